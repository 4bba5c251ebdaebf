//! Container probing and packet iteration, isolated from codec/resample concerns.
//!
//! Mirrors the split used throughout the pipeline: `demux` picks a track and hands back packets,
//! `decode` turns packets into PCM, `pipeline` normalizes PCM into 16 kHz mono.

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, Track};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Error, Result};

/// Probe the container and pick the first track that is both decodable and has a known sample
/// rate (resampling decisions downstream depend on it).
pub fn probe_and_pick_track(
    source: Box<dyn MediaSource>,
    hint_extension: Option<&str>,
) -> Result<(Box<dyn FormatReader>, Track)> {
    let mss_opts = MediaSourceStreamOptions {
        buffer_len: 256 * 1024,
    };
    let mss = MediaSourceStream::new(source, mss_opts);

    let mut hint = Hint::new();
    if let Some(ext) = hint_extension {
        hint.with_extension(ext);
    }

    let format_opts: FormatOptions = Default::default();
    let metadata_opts: MetadataOptions = Default::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| Error::AudioDecodeError(format!("failed to probe media stream: {e}")))?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .cloned()
        .ok_or_else(|| Error::AudioDecodeError("no audio track found".to_owned()))?;

    Ok((format, track))
}

/// Read the next packet, treating I/O errors as end-of-stream.
pub fn next_packet(format: &mut dyn FormatReader) -> Result<Option<Packet>> {
    match format.next_packet() {
        Ok(p) => Ok(Some(p)),
        Err(SymphoniaError::IoError(_)) => Ok(None),
        Err(e) => Err(Error::AudioDecodeError(format!(
            "failed reading packet: {e}"
        ))),
    }
}
