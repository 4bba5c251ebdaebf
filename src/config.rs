//! Typed application configuration, parsed once at process startup.
//!
//! Every environment variable in the external contract is read through the `config` crate's
//! [`Environment`] source rather than scattered `std::env::var` calls, so a missing/malformed
//! value fails fast during startup instead of surfacing as a confusing runtime error deep in the
//! pipeline. The resulting [`AppConfig`] is immutable for the lifetime of the process and is
//! handed to the orchestrator (and the HTTP adapter, when the `server` feature is enabled) behind
//! an `Arc`.

use std::path::PathBuf;

use config::{Config, Environment};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Selects which pretrained Whisper model the engine loads at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Small,
    Medium,
}

impl ModelSize {
    /// The `<size>` component of the artifact directory and model filename convention
    /// (`whisper_<size>_<profile>/ggml-<size>-q5_1.bin`).
    pub fn as_str(self) -> &'static str {
        match self {
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
        }
    }
}

/// Process-wide configuration, deserialized once from environment variables.
///
/// Field names are deliberately `snake_case` spellings of the uppercase environment variables
/// documented in the external interface contract (e.g. `whisper_chunk_duration_s` <->
/// `WHISPER_CHUNK_DURATION_S`) so a single [`Environment`] source can populate every field without
/// a common prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub whisper_model_size: ModelSize,
    pub whisper_artifacts_dir: PathBuf,

    pub whisper_chunk_enabled: bool,
    pub whisper_chunk_duration_s: f64,
    pub whisper_chunk_overlap_s: f64,
    pub whisper_fast_path_threshold_s: f64,

    pub whisper_chunk_timeout_s: u64,
    pub whisper_realtime_factor: f64,
    pub whisper_min_request_timeout_s: u64,

    pub whisper_merge_overlap_dedup: bool,

    pub max_upload_size_mb: u64,
    pub temp_dir: PathBuf,

    pub whisper_language_default: String,

    pub whisper_connect_timeout_s: u64,
    pub whisper_download_timeout_s: u64,

    pub api_key: String,

    pub bind_host: String,
    pub bind_port: u16,
}

impl AppConfig {
    /// Load configuration from the process environment, applying the defaults from §6 of the
    /// specification for anything not set.
    pub fn from_env() -> Result<Self> {
        let builder = Config::builder()
            .set_default("whisper_model_size", "small")?
            .set_default("whisper_artifacts_dir", default_artifacts_dir())?
            .set_default("whisper_chunk_enabled", true)?
            .set_default("whisper_chunk_duration_s", 30.0)?
            .set_default("whisper_chunk_overlap_s", 1.0)?
            .set_default("whisper_fast_path_threshold_s", 30.0)?
            .set_default("whisper_chunk_timeout_s", 60)?
            .set_default("whisper_realtime_factor", 1.5)?
            .set_default("whisper_min_request_timeout_s", 90)?
            .set_default("whisper_merge_overlap_dedup", false)?
            .set_default("max_upload_size_mb", 500)?
            .set_default("temp_dir", default_temp_dir())?
            .set_default("whisper_language_default", "")?
            .set_default("whisper_connect_timeout_s", 30)?
            .set_default("whisper_download_timeout_s", 300)?
            .set_default("api_key", "")?
            .set_default("bind_host", "0.0.0.0")?
            .set_default("bind_port", 8080)?
            .add_source(Environment::default());

        let config = builder.build().map_err(config_err)?;
        let app: AppConfig = config.try_deserialize().map_err(config_err)?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<()> {
        if self.whisper_chunk_duration_s <= self.whisper_chunk_overlap_s {
            return Err(Error::ArtifactMissing(format!(
                "whisper_chunk_duration_s ({}) must exceed whisper_chunk_overlap_s ({})",
                self.whisper_chunk_duration_s, self.whisper_chunk_overlap_s
            )));
        }
        Ok(())
    }

    /// The artifact directory for the configured model size:
    /// `<WHISPER_ARTIFACTS_DIR>/whisper_<size>_<profile>/`.
    pub fn model_artifact_dir(&self) -> PathBuf {
        self.whisper_artifacts_dir.join(format!(
            "whisper_{}_q5_1",
            self.whisper_model_size.as_str()
        ))
    }

    /// The model binary path by convention: `ggml-<size>-q5_1.bin`.
    pub fn model_path(&self) -> PathBuf {
        self.model_artifact_dir()
            .join(format!("ggml-{}-q5_1.bin", self.whisper_model_size.as_str()))
    }

    /// `Some(language)` unless the default is empty (auto-detect).
    pub fn default_language(&self) -> Option<&str> {
        if self.whisper_language_default.is_empty() {
            None
        } else {
            Some(&self.whisper_language_default)
        }
    }
}

fn default_artifacts_dir() -> String {
    "/opt/whisper".to_owned()
}

fn default_temp_dir() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}

fn config_err(err: config::ConfigError) -> Error {
    Error::ArtifactMissing(format!("invalid configuration: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_artifact_dir_follows_convention() {
        let mut cfg = sample_config();
        cfg.whisper_model_size = ModelSize::Medium;
        cfg.whisper_artifacts_dir = PathBuf::from("/opt/whisper");
        assert_eq!(
            cfg.model_artifact_dir(),
            PathBuf::from("/opt/whisper/whisper_medium_q5_1")
        );
        assert_eq!(
            cfg.model_path(),
            PathBuf::from("/opt/whisper/whisper_medium_q5_1/ggml-medium-q5_1.bin")
        );
    }

    #[test]
    fn default_language_is_none_when_empty() {
        let cfg = sample_config();
        assert_eq!(cfg.default_language(), None);
    }

    fn sample_config() -> AppConfig {
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
            api_key: "secret".to_owned(),
            bind_host: "0.0.0.0".to_owned(),
            bind_port: 8080,
        }
    }
}
