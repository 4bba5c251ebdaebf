//! Pipeline Orchestrator (C5, §4.5): per-request coordination with strict, guaranteed cleanup.
//!
//! Async because the surrounding download and HTTP layer are naturally async; the native engine
//! call itself runs on a blocking-task pool under a `tokio::time::timeout` watchdog, since it
//! cannot be cancelled mid-flight once the engine mutex is held (§5).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::{ChunkTranscript, TranscriptionResult};
use crate::engine::Transcriber;
use crate::error::{Error, Result};
use crate::merger;
use crate::segmenter::Segmenter;

pub struct Orchestrator {
    config: Arc<AppConfig>,
    transcriber: Arc<dyn Transcriber>,
    http_client: reqwest::Client,
}

impl Orchestrator {
    pub fn new(config: Arc<AppConfig>, transcriber: Arc<dyn Transcriber>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.whisper_connect_timeout_s))
            .build()
            .map_err(|e| Error::DownloadError(format!("failed to build http client: {e}")))?;

        Ok(Self {
            config,
            transcriber,
            http_client,
        })
    }

    /// Execute one transcription request end-to-end (§4.5 steps 1-8). Cleanup of the
    /// request-scoped temp directory runs on every exit path, success or failure.
    pub async fn transcribe(
        &self,
        audio_url: &str,
        language: Option<&str>,
    ) -> Result<TranscriptionResult> {
        let start = Instant::now();
        let request_id = Uuid::new_v4();
        let work_dir = self.config.temp_dir.join(format!("whisper-relay-{request_id}"));
        std::fs::create_dir_all(&work_dir).map_err(|e| Error::TransientStorageError(e.to_string()))?;
        let _cleanup = TempDirGuard(work_dir.clone());

        let result = self.run(audio_url, language, &work_dir, start).await;

        match &result {
            Ok(r) => tracing::info!(
                %request_id,
                chunks_processed = r.chunks_processed,
                processing_time_s = r.processing_time_s,
                "transcription request completed"
            ),
            Err(err) => tracing::error!(
                %request_id,
                error_kind = err.kind(),
                alert = err.is_alert(),
                "transcription request failed"
            ),
        }

        result
    }

    async fn run(
        &self,
        audio_url: &str,
        language: Option<&str>,
        work_dir: &Path,
        start: Instant,
    ) -> Result<TranscriptionResult> {
        let source_path = self.download(audio_url, work_dir).await?;

        let duration_s = {
            let path = source_path.clone();
            tokio::task::spawn_blocking(move || crate::audio::probe(&path))
                .await
                .map_err(join_error)??
        };
        if duration_s <= 0.0 {
            return Err(Error::AudioDecodeError("probed non-positive duration".to_owned()));
        }

        let overall_deadline = start
            + Duration::from_secs(self.config.whisper_min_request_timeout_s).max(
                Duration::try_from_secs_f64(duration_s * self.config.whisper_realtime_factor)
                    .unwrap_or(Duration::ZERO),
            );

        let resolved_language = language
            .map(str::to_owned)
            .or_else(|| self.config.default_language().map(str::to_owned));

        let mut segmenter = Segmenter::new(
            source_path.clone(),
            duration_s,
            work_dir.to_path_buf(),
            &self.config,
        );

        let mut chunks = Vec::new();
        loop {
            if Instant::now() >= overall_deadline {
                segmenter.abort_cleanup();
                return Err(Error::OverallTimeout);
            }

            let (next_result, returned_segmenter) = tokio::task::spawn_blocking(move || {
                let next = segmenter.next();
                (next, segmenter)
            })
            .await
            .map_err(join_error)?;
            segmenter = returned_segmenter;

            let Some(descriptor) = next_result? else {
                break;
            };

            let pcm = {
                let path = descriptor.path.clone();
                tokio::task::spawn_blocking(move || crate::audio::decode(&path))
                    .await
                    .map_err(join_error)??
            };

            let transcriber = self.transcriber.clone();
            let call_language = resolved_language.clone();
            let chunk_timeout = Duration::from_secs(self.config.whisper_chunk_timeout_s);

            let engine_call = tokio::task::spawn_blocking(move || {
                transcriber.transcribe(&pcm, call_language.as_deref())
            });

            let (text, confidence) = match tokio::time::timeout(chunk_timeout, engine_call).await {
                Ok(join_result) => join_result.map_err(join_error)??,
                Err(_) => {
                    // The spawned task keeps running (the engine mutex can't be force-released);
                    // its result is discarded. Logged as an alert per §4.5.
                    tracing::error!(chunk_index = descriptor.index, "chunk transcription timed out");
                    segmenter.abort_cleanup();
                    return Err(Error::ChunkTimeout);
                }
            };

            chunks.push(ChunkTranscript {
                index: descriptor.index,
                text,
                confidence,
            });
        }

        if chunks.is_empty() {
            return Err(Error::AudioDecodeError(
                "segmenter produced no chunks".to_owned(),
            ));
        }

        let (text, confidence) = merger::merge(&chunks, &self.config);

        Ok(TranscriptionResult {
            text,
            duration_s,
            confidence,
            processing_time_s: start.elapsed().as_secs_f64(),
            model: self.config.whisper_model_size.as_str().to_owned(),
            language: resolved_language.unwrap_or_else(|| "auto".to_owned()),
            chunks_processed: chunks.len(),
        })
    }

    async fn download(&self, audio_url: &str, work_dir: &Path) -> Result<PathBuf> {
        let url = reqwest::Url::parse(audio_url)
            .map_err(|e| Error::InvalidUrl(format!("{audio_url}: {e}")))?;

        let download_deadline = Duration::from_secs(self.config.whisper_download_timeout_s);
        let max_bytes = self.config.max_upload_size_mb * 1024 * 1024;

        let fut = async {
            let response = self
                .http_client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| Error::DownloadError(e.to_string()))?;

            if !response.status().is_success() {
                return Err(Error::DownloadError(format!(
                    "unexpected status {}",
                    response.status()
                )));
            }

            let extension = guess_extension(&url, response.headers());
            let dest = work_dir.join(format!("source{extension}"));
            let mut file = tokio::fs::File::create(&dest)
                .await
                .map_err(|e| Error::TransientStorageError(e.to_string()))?;

            let mut total: u64 = 0;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| Error::DownloadError(e.to_string()))?;
                total += chunk.len() as u64;
                if total > max_bytes {
                    drop(file);
                    let _ = tokio::fs::remove_file(&dest).await;
                    return Err(Error::PayloadTooLarge);
                }
                file.write_all(&chunk)
                    .await
                    .map_err(|e| Error::TransientStorageError(e.to_string()))?;
            }
            file.flush()
                .await
                .map_err(|e| Error::TransientStorageError(e.to_string()))?;

            Ok(dest)
        };

        match tokio::time::timeout(download_deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::DownloadTimeout),
        }
    }
}

fn guess_extension(url: &reqwest::Url, headers: &reqwest::header::HeaderMap) -> &'static str {
    if let Some(ext) = url
        .path()
        .rsplit('.')
        .next()
        .filter(|ext| !ext.is_empty() && ext.len() <= 4)
    {
        return match ext.to_ascii_lowercase().as_str() {
            "wav" => ".wav",
            "mp3" => ".mp3",
            "flac" => ".flac",
            "ogg" => ".ogg",
            "m4a" => ".m4a",
            _ => ".bin",
        };
    }

    match headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        Some("audio/wav") | Some("audio/x-wav") => ".wav",
        Some("audio/mpeg") => ".mp3",
        Some("audio/flac") => ".flac",
        _ => ".bin",
    }
}

fn join_error(err: tokio::task::JoinError) -> Error {
    Error::EngineError(format!("background task failed: {err}"))
}

struct TempDirGuard(PathBuf);

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelSize;
    use crate::domain::PcmBuffer;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::io::Cursor;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeTranscriber;

    impl Transcriber for FakeTranscriber {
        fn transcribe(&self, pcm: &PcmBuffer, language: Option<&str>) -> Result<(String, f32)> {
            Ok((
                format!("transcript for {} samples ({:?})", pcm.len(), language),
                0.92,
            ))
        }
    }

    fn test_config(temp_dir: PathBuf) -> AppConfig {
        AppConfig {
            whisper_model_size: ModelSize::Small,
            whisper_artifacts_dir: PathBuf::from("/opt/whisper"),
            whisper_chunk_enabled: true,
            whisper_chunk_duration_s: 30.0,
            whisper_chunk_overlap_s: 1.0,
            whisper_fast_path_threshold_s: 30.0,
            whisper_chunk_timeout_s: 60,
            whisper_realtime_factor: 1.5,
            whisper_min_request_timeout_s: 5,
            whisper_merge_overlap_dedup: false,
            max_upload_size_mb: 500,
            temp_dir,
            whisper_language_default: String::new(),
            whisper_connect_timeout_s: 5,
            whisper_download_timeout_s: 10,
            api_key: String::new(),
            bind_host: "0.0.0.0".to_owned(),
            bind_port: 8080,
        }
    }

    fn sine_wav_bytes(duration_s: f64, sample_rate: u32) -> Vec<u8> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            let n = (duration_s * sample_rate as f64) as usize;
            for i in 0..n {
                let t = i as f32 / sample_rate as f32;
                let v = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
                writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn direct_mode_success_roundtrip() {
        let server = MockServer::start().await;
        let body = sine_wav_bytes(2.0, 16_000);
        Mock::given(method("GET"))
            .and(path("/audio.wav"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let temp_root = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(temp_root.path().to_path_buf()));
        let transcriber: Arc<dyn Transcriber> = Arc::new(FakeTranscriber);
        let orchestrator = Orchestrator::new(config, transcriber).unwrap();

        let url = format!("{}/audio.wav", server.uri());
        let result = orchestrator.transcribe(&url, Some("en")).await.unwrap();

        assert_eq!(result.chunks_processed, 1);
        assert!((result.duration_s - 2.0).abs() < 0.1);
        assert!(result.text.contains("transcript for"));
        assert_eq!(result.language, "en");
    }

    #[tokio::test]
    async fn oversize_download_is_rejected_before_decode() {
        let server = MockServer::start().await;
        let body = vec![0u8; 2048];
        Mock::given(method("GET"))
            .and(path("/audio.wav"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let temp_root = tempfile::tempdir().unwrap();
        let mut config = test_config(temp_root.path().to_path_buf());
        config.max_upload_size_mb = 0; // any nonzero byte count trips the cap
        let config = Arc::new(config);
        let transcriber: Arc<dyn Transcriber> = Arc::new(FakeTranscriber);
        let orchestrator = Orchestrator::new(config, transcriber).unwrap();

        let url = format!("{}/audio.wav", server.uri());
        let err = orchestrator.transcribe(&url, None).await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge));
    }

    #[tokio::test]
    async fn non_2xx_status_is_a_download_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.wav"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp_root = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(temp_root.path().to_path_buf()));
        let transcriber: Arc<dyn Transcriber> = Arc::new(FakeTranscriber);
        let orchestrator = Orchestrator::new(config, transcriber).unwrap();

        let url = format!("{}/missing.wav", server.uri());
        let err = orchestrator.transcribe(&url, None).await.unwrap_err();
        assert!(matches!(err, Error::DownloadError(_)));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_any_request() {
        let temp_root = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(temp_root.path().to_path_buf()));
        let transcriber: Arc<dyn Transcriber> = Arc::new(FakeTranscriber);
        let orchestrator = Orchestrator::new(config, transcriber).unwrap();

        let err = orchestrator.transcribe("not a url", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn temp_directory_does_not_survive_a_successful_request() {
        let server = MockServer::start().await;
        let body = sine_wav_bytes(1.0, 16_000);
        Mock::given(method("GET"))
            .and(path("/audio.wav"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let temp_root = tempfile::tempdir().unwrap();
        let temp_root_path = temp_root.path().to_path_buf();
        let config = Arc::new(test_config(temp_root_path.clone()));
        let transcriber: Arc<dyn Transcriber> = Arc::new(FakeTranscriber);
        let orchestrator = Orchestrator::new(config, transcriber).unwrap();

        let url = format!("{}/audio.wav", server.uri());
        orchestrator.transcribe(&url, None).await.unwrap();

        let remaining: Vec<_> = std::fs::read_dir(&temp_root_path).unwrap().collect();
        assert!(remaining.is_empty(), "temp dir should be empty after cleanup");
    }
}
