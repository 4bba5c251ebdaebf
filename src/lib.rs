//! `whisper-relay` — a stateless HTTP speech-to-text relay built on Whisper.
//!
//! This crate provides:
//! - A process-wide native engine binding ([`engine`]) amortizing acoustic-model load cost
//! - A Rust-native audio demux/decode/resample pipeline ([`audio`])
//! - A segmenting strategy that bounds CPU/memory/wall-clock for arbitrarily long inputs
//!   ([`segmenter`])
//! - A merger combining ordered chunk transcripts into one transcript ([`merger`])
//! - A per-request orchestrator tying the above together with typed errors and guaranteed
//!   cleanup ([`orchestrator`])
//!
//! The library is designed to be consumed by an HTTP adapter (see the `server` feature and the
//! `whisper-relay-server` binary) but has no dependency on `axum` itself with `server` disabled.

pub mod audio;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod merger;
pub mod orchestrator;
pub mod segmenter;

pub use config::AppConfig;
pub use domain::TranscriptionResult;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
