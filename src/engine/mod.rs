//! Engine Binding (C1, §4.1): the one and only interface to the native Whisper engine.
//!
//! The orchestrator depends on the abstract [`Transcriber`] capability, not on a concrete engine
//! type or a bare process global — the re-architected replacement for a "module-level singleton
//! transcriber" (§9 of the specification): tests substitute a fake `Transcriber`, production wires
//! [`WhisperTranscriber`], which itself reads the process-wide [`OnceLock`]-guarded context
//! internally.

mod artifacts;

use std::sync::{Arc, Mutex, OnceLock};

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

use crate::config::AppConfig;
use crate::domain::PcmBuffer;
use crate::error::{Error, Result};

/// Confidence reported when a chunk's segments carry no usable per-token probability (e.g. pure
/// silence). Not a calibrated score — see §4.1.
const FALLBACK_CONFIDENCE: f32 = 0.95;

/// A capability for running a single synchronous transcription call.
///
/// A single process-wide instance must be used for every call (the native context is not
/// reentrant) — callers are responsible for serializing access; see [`WhisperTranscriber`], which
/// does so internally with a mutex.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, pcm: &PcmBuffer, language: Option<&str>) -> Result<(String, f32)>;
}

/// The real engine binding, backed by `whisper-rs` / whisper.cpp.
pub struct WhisperTranscriber {
    ctx: WhisperContext,
    lock: Mutex<()>,
    n_threads: i32,
}

impl WhisperTranscriber {
    /// Load the model named by `config` and initialize a context. Attempted only once per
    /// process; see [`init`].
    pub fn load(config: &AppConfig) -> Result<Self> {
        artifacts::verify_present(config)?;

        let model_path = config.model_path();
        let model_path_str = model_path.to_str().ok_or_else(|| {
            Error::ModelInitError(format!(
                "model path is not valid UTF-8: {}",
                model_path.display()
            ))
        })?;

        let ctx_params = WhisperContextParameters::default();
        let ctx = WhisperContext::new_with_params(model_path_str, ctx_params).map_err(|e| {
            Error::ModelInitError(format!("failed to initialize model context: {e}"))
        })?;

        Ok(Self {
            ctx,
            lock: Mutex::new(()),
            n_threads: num_cpus::get() as i32,
        })
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, pcm: &PcmBuffer, language: Option<&str>) -> Result<(String, f32)> {
        // Exactly one native call in flight at any instant across the process (§5).
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::EngineError("engine mutex poisoned".to_owned()))?;

        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: 5,
            patience: 1.0,
        });
        params.set_n_threads(self.n_threads);
        params.set_translate(false);
        params.set_language(language);
        params.set_single_segment(false);
        params.set_no_context(true);
        params.set_token_timestamps(true);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| Error::EngineError(format!("failed to create whisper state: {e}")))?;

        state
            .full(params, pcm.samples())
            .map_err(|e| Error::EngineError(format!("whisper full() failed: {e}")))?;

        collect_text_and_confidence(&state)
    }
}

fn collect_text_and_confidence(state: &WhisperState) -> Result<(String, f32)> {
    let mut parts = Vec::new();
    let mut probability_sum = 0f64;
    let mut probability_count = 0u64;

    for segment in state.as_iter() {
        let text = segment
            .to_str()
            .map_err(|e| Error::EngineError(format!("failed to read segment text: {e}")))?;
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_owned());
        }

        let n_tokens = segment.n_tokens();
        for idx in 0..n_tokens {
            let Ok(token) = segment.get_token(idx) else {
                continue;
            };
            let p = token.token_data().p;
            if p.is_finite() && p > 0.0 {
                probability_sum += p as f64;
                probability_count += 1;
            }
        }
    }

    let text = parts.join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
    let confidence = if probability_count > 0 {
        (probability_sum / probability_count as f64) as f32
    } else {
        FALLBACK_CONFIDENCE
    };

    Ok((text, confidence))
}

static ENGINE: OnceLock<Arc<WhisperTranscriber>> = OnceLock::new();

/// Initialize the process-wide engine context if it hasn't been already, and return a shared
/// handle to it. Initialization is attempted at most once per process (§4.1) — failures here are
/// startup-fatal and should stop the process from serving requests.
pub fn init(config: &AppConfig) -> Result<Arc<dyn Transcriber>> {
    if let Some(existing) = ENGINE.get() {
        return Ok(existing.clone() as Arc<dyn Transcriber>);
    }

    let transcriber = Arc::new(WhisperTranscriber::load(config)?);
    // If another thread won the race to initialize first, keep its instance instead.
    let _ = ENGINE.set(transcriber);
    Ok(ENGINE.get().expect("just set").clone() as Arc<dyn Transcriber>)
}

/// The already-initialized engine, if any. Used by the `/health` endpoint.
pub fn global() -> Option<Arc<dyn Transcriber>> {
    ENGINE.get().map(|t| t.clone() as Arc<dyn Transcriber>)
}
