//! Segmenter (C3, §4.3): direct-vs-chunked mode selection and lazy chunk materialization.
//!
//! Chunks are materialized one at a time via [`crate::audio::slice`] and deleted as soon as the
//! consumer asks for the next one (or aborts) — at most one chunk file exists on disk at a time
//! in chunked mode, bounding the per-request disk budget from §5.

use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::domain::ChunkDescriptor;
use crate::error::Result;

enum Mode {
    Direct,
    Chunked,
}

/// Emits [`ChunkDescriptor`]s in order, one at a time, slicing lazily.
pub struct Segmenter {
    source_path: PathBuf,
    work_dir: PathBuf,
    mode: Mode,
    boundaries: Vec<(f64, f64)>,
    next_index: usize,
    pending_cleanup: Option<PathBuf>,
}

impl Segmenter {
    /// Decide chunking mode for a source of the given duration and prepare the boundary schedule.
    /// No I/O happens until [`Segmenter::next`] is first called.
    pub fn new(source_path: PathBuf, duration_s: f64, work_dir: PathBuf, config: &AppConfig) -> Self {
        if !config.whisper_chunk_enabled || duration_s <= config.whisper_fast_path_threshold_s {
            return Self {
                source_path,
                work_dir,
                mode: Mode::Direct,
                boundaries: vec![(0.0, duration_s)],
                next_index: 0,
                pending_cleanup: None,
            };
        }

        let boundaries = compute_boundaries(
            duration_s,
            config.whisper_chunk_duration_s,
            config.whisper_chunk_overlap_s,
        );

        Self {
            source_path,
            work_dir,
            mode: Mode::Chunked,
            boundaries,
            next_index: 0,
            pending_cleanup: None,
        }
    }

    /// Produce the next descriptor, deleting the previously-yielded chunk file first (chunked mode
    /// only — the source file in direct mode is owned by the orchestrator). Returns `Ok(None)` once
    /// the schedule is exhausted.
    pub fn next(&mut self) -> Result<Option<ChunkDescriptor>> {
        self.cleanup_previous();

        if self.next_index >= self.boundaries.len() {
            return Ok(None);
        }

        let index = self.next_index;
        let (start_s, end_s) = self.boundaries[index];
        self.next_index += 1;

        let path = match self.mode {
            Mode::Direct => self.source_path.clone(),
            Mode::Chunked => {
                let chunk_path = chunk_path(&self.work_dir, index);
                crate::audio::slice(&self.source_path, &chunk_path, start_s, end_s)?;
                self.pending_cleanup = Some(chunk_path.clone());
                chunk_path
            }
        };

        Ok(Some(ChunkDescriptor {
            index,
            start_s,
            end_s,
            path,
        }))
    }

    /// Delete whatever chunk file is currently materialized without producing another one — used
    /// when the orchestrator aborts iteration early on a failure (§4.3 failure semantics).
    pub fn abort_cleanup(&mut self) {
        self.cleanup_previous();
    }

    fn cleanup_previous(&mut self) {
        if let Some(path) = self.pending_cleanup.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn chunk_path(work_dir: &Path, index: usize) -> PathBuf {
    work_dir.join(format!("chunk_{index:04}.wav"))
}

/// Compute `[start, end)` boundaries per §4.3: fixed `step = duration - overlap`, last chunk
/// merged into its predecessor if shorter than `min(chunk_duration_s/4, 1.0)` seconds.
fn compute_boundaries(duration_s: f64, chunk_duration_s: f64, chunk_overlap_s: f64) -> Vec<(f64, f64)> {
    let step = chunk_duration_s - chunk_overlap_s;
    debug_assert!(step > 0.0, "chunk_duration_s must exceed chunk_overlap_s");

    let mut boundaries = Vec::new();
    let mut i: u64 = 0;
    loop {
        let start = i as f64 * step;
        if start >= duration_s {
            break;
        }
        let end = (start + chunk_duration_s).min(duration_s);
        boundaries.push((start, end));
        if end >= duration_s {
            break;
        }
        i += 1;
    }

    let min_tail = (chunk_duration_s / 4.0).min(1.0);
    if boundaries.len() >= 2 {
        let last = boundaries.len() - 1;
        let (last_start, last_end) = boundaries[last];
        if last_end - last_start < min_tail {
            let (prev_start, _) = boundaries[last - 1];
            boundaries[last - 1] = (prev_start, last_end);
            boundaries.pop();
        }
    }

    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelSize;

    fn base_config() -> AppConfig {
        AppConfig {
            whisper_model_size: ModelSize::Small,
            whisper_artifacts_dir: PathBuf::from("/opt/whisper"),
            whisper_chunk_enabled: true,
            whisper_chunk_duration_s: 30.0,
            whisper_chunk_overlap_s: 1.0,
            whisper_fast_path_threshold_s: 30.0,
            whisper_chunk_timeout_s: 60,
            whisper_realtime_factor: 1.5,
            whisper_min_request_timeout_s: 90,
            whisper_merge_overlap_dedup: false,
            max_upload_size_mb: 500,
            temp_dir: std::env::temp_dir(),
            whisper_language_default: String::new(),
            whisper_connect_timeout_s: 30,
            whisper_download_timeout_s: 300,
            api_key: String::new(),
            bind_host: "0.0.0.0".to_owned(),
            bind_port: 8080,
        }
    }

    #[test]
    fn short_audio_uses_direct_mode_without_slicing() {
        let boundaries = compute_boundaries(10.0, 30.0, 1.0);
        // direct mode never calls compute_boundaries; this just checks the formula is inert here.
        assert_eq!(boundaries, vec![(0.0, 10.0)]);
    }

    #[test]
    fn chunked_boundaries_cover_the_full_duration_contiguously() {
        let boundaries = compute_boundaries(70.0, 30.0, 1.0);
        assert_eq!(boundaries, vec![(0.0, 30.0), (29.0, 59.0), (58.0, 70.0)]);
        assert_eq!(boundaries.last().unwrap().1, 70.0);
    }

    #[test]
    fn short_tail_chunk_is_merged_into_previous() {
        let boundaries = compute_boundaries(20.5, 10.0, 0.0);
        // naive schedule would be (0,10) (10,20) (20,20.5) with a 0.5s tail < min_tail(1.0).
        assert_eq!(boundaries, vec![(0.0, 10.0), (10.0, 20.5)]);
    }

    #[test]
    fn direct_mode_yields_a_single_descriptor_and_does_not_delete_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.wav");
        std::fs::write(&source, b"not real audio").unwrap();

        let mut config = base_config();
        config.whisper_fast_path_threshold_s = 30.0;

        let mut segmenter = Segmenter::new(source.clone(), 10.0, dir.path().to_path_buf(), &config);
        let first = segmenter.next().unwrap().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.path, source);
        assert!(source.exists());

        assert!(segmenter.next().unwrap().is_none());
        assert!(source.exists());
    }

    #[test]
    fn chunking_disabled_forces_direct_mode_regardless_of_duration() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.wav");
        std::fs::write(&source, b"not real audio").unwrap();

        let mut config = base_config();
        config.whisper_chunk_enabled = false;

        let mut segmenter = Segmenter::new(source.clone(), 999.0, dir.path().to_path_buf(), &config);
        let first = segmenter.next().unwrap().unwrap();
        assert_eq!(first.start_s, 0.0);
        assert_eq!(first.end_s, 999.0);
        assert!(segmenter.next().unwrap().is_none());
    }

    proptest::proptest! {
        // Universal invariants (§8): contiguous indices, non-decreasing starts, full coverage of
        // [0, duration_s], and every chunk meeting the tail-length floor, for arbitrary durations
        // and chunk/overlap configurations.
        #[test]
        fn boundaries_are_contiguous_and_cover_the_full_duration(
            duration_s in 0.1f64..3600.0,
            chunk_duration_s in 2.0f64..120.0,
            overlap_frac in 0.0f64..0.9,
        ) {
            let chunk_overlap_s = chunk_duration_s * overlap_frac;
            let boundaries = compute_boundaries(duration_s, chunk_duration_s, chunk_overlap_s);

            prop_assert!(!boundaries.is_empty());
            prop_assert!((boundaries.last().unwrap().1 - duration_s).abs() < 1e-6);

            let mut prev_end: Option<f64> = None;
            for &(start, end) in &boundaries {
                prop_assert!(start < end);
                if let Some(prev_end) = prev_end {
                    prop_assert!(start <= prev_end + 1e-9);
                }
                prev_end = Some(end);
            }
        }
    }
}
