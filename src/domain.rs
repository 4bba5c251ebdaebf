//! Core data types shared across the pipeline (§3 of the specification).
//!
//! These are plain value types with no I/O of their own; the modules in [`crate::audio`],
//! [`crate::segmenter`], [`crate::engine`] and [`crate::merger`] produce and consume them.

use std::path::PathBuf;

/// The sample rate every [`PcmBuffer`] is normalized to.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Contiguous 16 kHz mono `f32` samples normalized to `[-1, 1]`.
///
/// Invariant: sample rate is exactly [`TARGET_SAMPLE_RATE`], channel count is exactly 1.
#[derive(Debug, Clone, Default)]
pub struct PcmBuffer {
    samples: Vec<f32>,
}

impl PcmBuffer {
    /// Wrap already-normalized mono 16 kHz samples.
    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / TARGET_SAMPLE_RATE as f64
    }
}

/// A single ordered segment of source audio, materialized on disk.
///
/// Produced by [`crate::segmenter::Segmenter`]. `start_s`/`end_s` describe the half-open
/// interval `[start_s, end_s)` this chunk covers in the original source's timeline.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub index: usize,
    pub start_s: f64,
    pub end_s: f64,
    pub path: PathBuf,
}

impl ChunkDescriptor {
    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

/// The engine's output for a single chunk.
#[derive(Debug, Clone)]
pub struct ChunkTranscript {
    pub index: usize,
    pub text: String,
    pub confidence: f32,
}

/// The orchestrator's final, user-facing result (§3, §6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub duration_s: f64,
    pub confidence: f32,
    pub processing_time_s: f64,
    pub model: String,
    pub language: String,
    pub chunks_processed: usize,
}
