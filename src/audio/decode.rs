//! Decoder helpers built on top of Symphonia.
//!
//! Isolates codec-level concerns so the higher-level loader can focus on
//! demux -> decode -> resample without worrying about codec edge cases.

use symphonia::core::audio::AudioBufferRef;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{Packet, Track};

use crate::error::{Error, Result};

/// Create a decoder for the given audio track using Symphonia's default codec registry.
pub fn make_decoder_for_track(track: &Track) -> Result<Box<dyn Decoder>> {
    let decoder_opts: DecoderOptions = Default::default();

    symphonia::default::get_codecs()
        .make(&track.codec_params, &decoder_opts)
        .map_err(|e| Error::AudioDecodeError(format!("failed to create decoder: {e}")))
}

/// Decode a packet and hand the decoded buffer to a callback.
///
/// `Ok(true)` means a buffer was produced and the callback ran; `Ok(false)` means the packet was
/// skipped or the stream ended (both recoverable); `Err` is a fatal decoder error.
pub fn decode_packet_and_then(
    decoder: &mut dyn Decoder,
    packet: &Packet,
    mut on_decoded: impl FnMut(AudioBufferRef<'_>) -> Result<()>,
) -> Result<bool> {
    match decoder.decode(packet) {
        Ok(buf) => {
            on_decoded(buf)?;
            Ok(true)
        }
        // Corrupted frame; decoding can continue.
        Err(SymphoniaError::DecodeError(_)) => Ok(false),
        // Treat as graceful end-of-stream.
        Err(SymphoniaError::IoError(_)) => Ok(false),
        Err(e) => Err(Error::AudioDecodeError(format!("decoder failure: {e}"))),
    }
}
