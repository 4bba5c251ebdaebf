//! Audio Loader (C2, §4.2): demux, decode, and chunk slicing.
//!
//! Decodes any container/codec Symphonia's registry supports into 16 kHz mono `f32` PCM, and
//! reports duration. No state is retained between calls; each operation opens and closes its own
//! file handles and logs one `tracing` event with duration, input size, and output size.

mod decode;
mod demux;
mod pipeline;

mod loader;

pub use loader::{decode, probe, slice};
pub use pipeline::AudioPipeline;
