//! Audio Loader (C2): probe, full decode, and chunk slicing.
//!
//! Implemented as a Rust-native demux/decode/resample pipeline rather than shelling out to an
//! external CLI audio toolchain (see DESIGN.md) — the idiomatic in-process replacement for the
//! "external toolchain contract" described in the distilled specification. Every call opens and
//! closes its own file handles; no state is retained between calls.

use std::fs::File;
use std::path::Path;
use std::time::Instant;

use hound::{SampleFormat, WavSpec, WavWriter};
use symphonia::core::formats::{FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSource;
use symphonia::core::units::Time;

use crate::audio::decode::{decode_packet_and_then, make_decoder_for_track};
use crate::audio::demux::{next_packet, probe_and_pick_track};
use crate::audio::pipeline::AudioPipeline;
use crate::domain::{PcmBuffer, TARGET_SAMPLE_RATE};
use crate::error::{Error, Result};

/// Samples emitted per callback while decoding (pure implementation detail, not the chunk size).
const DECODE_CHUNK_FRAMES: usize = 4096;

/// Probe `path`'s container metadata and return its duration in seconds.
///
/// Prefers the container-reported frame count and time base; falls back to a full decode pass
/// that counts samples when the container does not report one (e.g. some streamed containers).
pub fn probe(path: &Path) -> Result<f64> {
    let start = Instant::now();
    let input_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    let (format, track) = open_track(path)?;

    let duration_s = match (track.codec_params.n_frames, track.codec_params.time_base) {
        (Some(n_frames), Some(time_base)) => {
            let time = time_base.calc_time(n_frames);
            time.seconds as f64 + time.frac
        }
        _ => decode_count_duration(format, &track)?,
    };

    if duration_s <= 0.0 {
        return Err(Error::AudioDecodeError(format!(
            "probed non-positive duration for {}",
            path.display()
        )));
    }

    tracing::info!(
        operation = "probe",
        path = %path.display(),
        input_bytes = input_len,
        duration_s,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "audio loader operation complete"
    );

    Ok(duration_s)
}

/// Fully decode `path` into 16 kHz mono `f32` PCM normalized to `[-1, 1]`.
pub fn decode(path: &Path) -> Result<PcmBuffer> {
    let start = Instant::now();
    let input_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    let (mut format, track) = open_track(path)?;
    let mut decoder = make_decoder_for_track(&track)?;
    let mut pipeline = AudioPipeline::new();
    let mut samples = Vec::new();

    decode_all_packets(
        format.as_mut(),
        track.id,
        &mut decoder,
        &mut pipeline,
        &mut samples,
    )?;

    let pcm = PcmBuffer::from_samples(samples);

    tracing::info!(
        operation = "decode",
        path = %path.display(),
        input_bytes = input_len,
        output_samples = pcm.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "audio loader operation complete"
    );

    Ok(pcm)
}

/// Decode the half-open interval `[start_s, end_s)` of `src_path` and write it as a 16 kHz mono
/// WAV to `dst_path`.
pub fn slice(src_path: &Path, dst_path: &Path, start_s: f64, end_s: f64) -> Result<()> {
    let op_start = Instant::now();

    let result = slice_inner(src_path, dst_path, start_s, end_s);
    if result.is_err() {
        // Never leave a partial file behind on failure.
        let _ = std::fs::remove_file(dst_path);
    }
    result?;

    let output_len = std::fs::metadata(dst_path).map(|m| m.len()).unwrap_or(0);
    tracing::info!(
        operation = "slice",
        src = %src_path.display(),
        dst = %dst_path.display(),
        start_s,
        end_s,
        output_bytes = output_len,
        elapsed_ms = op_start.elapsed().as_millis() as u64,
        "audio loader operation complete"
    );

    Ok(())
}

fn slice_inner(src_path: &Path, dst_path: &Path, start_s: f64, end_s: f64) -> Result<()> {
    let (mut format, track) = open_track(src_path)?;
    let track_id = track.id;

    if start_s > 0.0 {
        format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(start_s),
                    track_id: Some(track_id),
                },
            )
            .map_err(|e| Error::AudioSliceError(format!("seek to {start_s}s failed: {e}")))?;
    }

    let time_base = track.codec_params.time_base;
    let mut decoder = make_decoder_for_track(&track)?;
    let mut pipeline = AudioPipeline::new();
    let mut samples = Vec::new();

    loop {
        let Some(packet) = next_packet(format.as_mut())? else {
            break;
        };

        if packet.track_id() != track_id {
            continue;
        }

        if let Some(time_base) = time_base {
            let ts = time_base.calc_time(packet.ts());
            let packet_s = ts.seconds as f64 + ts.frac;
            if packet_s >= end_s {
                break;
            }
        }

        decode_packet_and_then(decoder.as_mut(), &packet, |decoded| {
            pipeline.push_decoded_and_emit(&decoded, DECODE_CHUNK_FRAMES, |chunk| {
                samples.extend_from_slice(chunk);
                Ok(true)
            })
        })?;
    }

    pipeline.finalize(DECODE_CHUNK_FRAMES, |chunk| {
        samples.extend_from_slice(chunk);
        Ok(true)
    })?;

    write_wav(dst_path, &samples)
        .map_err(|e| Error::AudioSliceError(format!("failed to write {}: {e}", dst_path.display())))
}

fn decode_count_duration(mut format: Box<dyn FormatReader>, track: &symphonia::core::formats::Track) -> Result<f64> {
    let mut decoder = make_decoder_for_track(track)?;
    let mut pipeline = AudioPipeline::new();
    let mut samples = Vec::new();

    decode_all_packets(
        format.as_mut(),
        track.id,
        &mut decoder,
        &mut pipeline,
        &mut samples,
    )?;

    Ok(samples.len() as f64 / TARGET_SAMPLE_RATE as f64)
}

fn decode_all_packets(
    format: &mut dyn FormatReader,
    track_id: u32,
    decoder: &mut Box<dyn symphonia::core::codecs::Decoder>,
    pipeline: &mut AudioPipeline,
    samples: &mut Vec<f32>,
) -> Result<()> {
    loop {
        let Some(packet) = next_packet(format)? else {
            break;
        };

        if packet.track_id() != track_id {
            continue;
        }

        decode_packet_and_then(decoder.as_mut(), &packet, |decoded| {
            pipeline.push_decoded_and_emit(&decoded, DECODE_CHUNK_FRAMES, |chunk| {
                samples.extend_from_slice(chunk);
                Ok(true)
            })
        })?;
    }

    pipeline.finalize(DECODE_CHUNK_FRAMES, |chunk| {
        samples.extend_from_slice(chunk);
        Ok(true)
    })
}

fn open_track(path: &Path) -> Result<(Box<dyn FormatReader>, symphonia::core::formats::Track)> {
    let file = File::open(path)
        .map_err(|e| Error::AudioDecodeError(format!("failed to open {}: {e}", path.display())))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_owned);

    probe_and_pick_track(Box::new(file) as Box<dyn MediaSource>, extension.as_deref())
}

fn write_wav(dst_path: &Path, samples: &[f32]) -> anyhow::Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(dst_path, spec)?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_sine_wav(path: &Path, duration_s: f64, sample_rate: u32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        let n = (duration_s * sample_rate as f64) as usize;
        for i in 0..n {
            let t = i as f32 / sample_rate as f32;
            let v = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
            writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn probe_reports_duration_within_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 2.0, 16_000);

        let duration = probe(&path).unwrap();
        assert!((duration - 2.0).abs() < 0.05, "duration={duration}");
    }

    #[test]
    fn decode_produces_mono_16k_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 1.0, 8_000);

        let pcm = decode(&path).unwrap();
        assert!((pcm.duration_seconds() - 1.0).abs() < 0.05);
        assert!(pcm.samples().iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn slice_extracts_requested_interval() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tone.wav");
        write_sine_wav(&src, 4.0, 16_000);

        let dst = dir.path().join("chunk.wav");
        slice(&src, &dst, 1.0, 2.5).unwrap();

        assert!(dst.exists());
        let sliced_duration = probe(&dst).unwrap();
        assert!((sliced_duration - 1.5).abs() < 0.1, "{sliced_duration}");
    }

    #[test]
    fn slice_cleans_up_partial_file_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("missing.wav");
        let dst = dir.path().join("chunk.wav");
        std::fs::File::create(&dst).unwrap().write_all(b"stale").unwrap();

        let err = slice(&src, &dst, 0.0, 1.0);
        assert!(err.is_err());
        assert!(!dst.exists());
    }

    #[test]
    fn probe_fails_on_nonexistent_file() {
        let err = probe(Path::new("/nonexistent/path.wav"));
        assert!(err.is_err());
    }
}
