//! PCM normalization: downmix to mono and resample to 16 kHz.
//!
//! Intentionally allocation-conscious but favors clarity first. `finalize()` must be called at
//! end-of-stream to flush any samples still buffered in the resampler.

use rubato::{Resampler, SincFixedIn, WindowFunction};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};

use crate::domain::TARGET_SAMPLE_RATE;
use crate::error::{Error, Result};

/// Stateful pipeline that converts decoded audio into mono 16 kHz `f32` chunks.
#[derive(Default)]
pub struct AudioPipeline {
    sample_buf_f32: Option<SampleBuffer<f32>>,
    resampler: Option<SincFixedIn<f32>>,
    mono_src_acc: Vec<f32>,
    resample_in_chan: Vec<f32>,
    resample_out_chan: Vec<f32>,
}

impl AudioPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a decoded Symphonia buffer through the pipeline and emit 16 kHz mono chunks.
    ///
    /// Returning `Ok(false)` from `emit` signals "stop early".
    pub fn push_decoded_and_emit(
        &mut self,
        decoded: &AudioBufferRef<'_>,
        target_chunk_frames: usize,
        mut emit: impl FnMut(&[f32]) -> Result<bool>,
    ) -> Result<()> {
        let (interleaved, src_rate, channels) =
            decoded_to_interleaved_f32(decoded, &mut self.sample_buf_f32)?;

        let mono_src = downmix_to_mono(&interleaved, channels);

        if src_rate == TARGET_SAMPLE_RATE {
            emit_mono_chunks(&mono_src, target_chunk_frames, &mut emit)?;
            return Ok(());
        }

        self.ensure_resampler(src_rate)?;
        self.push_and_flush_resampler(&mono_src, target_chunk_frames, &mut emit)?;
        Ok(())
    }

    /// Flush any samples still buffered in the resampler. A no-op if resampling was never needed.
    pub fn finalize(
        &mut self,
        target_chunk_frames: usize,
        mut emit: impl FnMut(&[f32]) -> Result<bool>,
    ) -> Result<()> {
        let Some(rs) = self.resampler.as_mut() else {
            return Ok(());
        };

        if self.mono_src_acc.is_empty() {
            return Ok(());
        }

        let in_max = rs.input_frames_max();
        let rem = self.mono_src_acc.len() % in_max;
        if rem != 0 {
            self.mono_src_acc
                .resize(self.mono_src_acc.len() + (in_max - rem), 0.0);
        }

        while !self.mono_src_acc.is_empty() {
            let block: Vec<f32> = self.mono_src_acc.drain(..in_max).collect();
            let out = self.resample_block_into_out(&block)?;
            emit_mono_chunks(out, target_chunk_frames, &mut emit)?;
        }

        Ok(())
    }

    fn ensure_resampler(&mut self, src_rate: u32) -> Result<()> {
        if self.resampler.is_some() {
            return Ok(());
        }

        // Source frames fed to rubato per `process()` call: larger chunks trade latency for
        // throughput.
        let in_chunk_src_frames = 2048;

        let rs = SincFixedIn::<f32>::new(
            TARGET_SAMPLE_RATE as f64 / src_rate as f64,
            2.0,
            rubato::SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: rubato::SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
            in_chunk_src_frames,
            1,
        )
        .map_err(|e| Error::AudioDecodeError(format!("failed to init resampler: {e}")))?;

        self.resampler = Some(rs);
        Ok(())
    }

    fn push_and_flush_resampler(
        &mut self,
        mono_src: &[f32],
        target_chunk_frames: usize,
        emit: &mut impl FnMut(&[f32]) -> Result<bool>,
    ) -> Result<()> {
        self.mono_src_acc.extend_from_slice(mono_src);

        loop {
            let rs = self
                .resampler
                .as_ref()
                .ok_or_else(|| Error::AudioDecodeError("resampler not initialized".to_owned()))?;
            let in_max = rs.input_frames_max();

            if self.mono_src_acc.len() < in_max {
                break;
            }

            let block: Vec<f32> = self.mono_src_acc.drain(..in_max).collect();
            let out = self.resample_block_into_out(&block)?;

            for chunk in out.chunks(target_chunk_frames) {
                if !emit(chunk)? {
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// Resample one mono block and return a borrowed view of the output; valid until the next
    /// call.
    fn resample_block_into_out(&mut self, mono_src_block: &[f32]) -> Result<&[f32]> {
        let rs = self
            .resampler
            .as_mut()
            .ok_or_else(|| Error::AudioDecodeError("resampler not initialized".to_owned()))?;

        self.resample_in_chan.clear();
        self.resample_in_chan.extend_from_slice(mono_src_block);

        let input = vec![self.resample_in_chan.clone()];
        let out = rs
            .process(&input, None)
            .map_err(|e| Error::AudioDecodeError(format!("resampler process failed: {e}")))?;

        if out.len() != 1 {
            return Err(Error::AudioDecodeError(
                "expected mono output from resampler".to_owned(),
            ));
        }

        self.resample_out_chan = out[0].clone();
        Ok(&self.resample_out_chan)
    }
}

fn decoded_to_interleaved_f32(
    decoded: &AudioBufferRef<'_>,
    sample_buf_f32: &mut Option<SampleBuffer<f32>>,
) -> Result<(Vec<f32>, u32, usize)> {
    if sample_buf_f32.is_none() {
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;
        *sample_buf_f32 = Some(SampleBuffer::<f32>::new(duration, spec));
    }

    let buf = sample_buf_f32
        .as_mut()
        .ok_or_else(|| Error::AudioDecodeError("sample buffer not initialized".to_owned()))?;

    buf.copy_interleaved_ref(decoded.clone());

    let src_rate = decoded.spec().rate;
    let channels = decoded.spec().channels.count();
    if channels == 0 {
        return Err(Error::AudioDecodeError(
            "decoded audio had zero channels".to_owned(),
        ));
    }

    Ok((buf.samples().to_vec(), src_rate, channels))
}

/// Downmix interleaved samples into mono by equal-weight channel averaging.
fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }

    let frames = interleaved.len() / channels;
    let mut mono = Vec::with_capacity(frames);

    for f in 0..frames {
        let base = f * channels;
        let mut acc = 0.0;
        for c in 0..channels {
            acc += interleaved[base + c];
        }
        mono.push(acc / channels as f32);
    }

    mono
}

fn emit_mono_chunks(
    mono_16k: &[f32],
    chunk_frames: usize,
    emit: &mut impl FnMut(&[f32]) -> Result<bool>,
) -> Result<()> {
    for chunk in mono_16k.chunks(chunk_frames) {
        if !emit(chunk)? {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_is_noop_without_resampler() {
        let mut pipeline = AudioPipeline::new();
        pipeline.finalize(256, |_| Ok(true)).unwrap();
    }

    #[test]
    fn downmix_to_mono_single_channel_is_identity() {
        let input = vec![0.0, 1.0, -1.0];
        let mono = downmix_to_mono(&input, 1);
        assert_eq!(mono, input);
    }

    #[test]
    fn downmix_to_mono_averages_channels() {
        let interleaved = vec![1.0, 3.0, -1.0, 1.0];
        let mono = downmix_to_mono(&interleaved, 2);
        assert_eq!(mono, vec![2.0, 0.0]);
    }

    #[test]
    fn emit_mono_chunks_respects_early_stop() {
        let mut seen = Vec::new();
        let mono = vec![1.0; 10];
        emit_mono_chunks(&mono, 4, &mut |chunk| {
            seen.push(chunk.len());
            Ok(false)
        })
        .unwrap();

        assert_eq!(seen, vec![4]);
    }

    #[test]
    fn resample_path_emits_and_finalize_flushes_remainder() {
        let mut pipeline = AudioPipeline::new();
        pipeline.ensure_resampler(8_000).unwrap();
        pipeline.ensure_resampler(8_000).unwrap(); // idempotent

        let in_max = pipeline
            .resampler
            .as_ref()
            .expect("resampler initialized")
            .input_frames_max();

        let mono_src = vec![0.0; (in_max * 2) + 7];

        let mut emitted_samples = 0usize;
        pipeline
            .push_and_flush_resampler(&mono_src, 256, &mut |chunk| {
                emitted_samples += chunk.len();
                Ok(true)
            })
            .unwrap();

        assert!(pipeline.mono_src_acc.len() < in_max);

        pipeline
            .finalize(256, |chunk| {
                emitted_samples += chunk.len();
                Ok(true)
            })
            .unwrap();

        assert!(emitted_samples > 0);
    }
}
