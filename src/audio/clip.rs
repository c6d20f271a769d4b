//! Upload clip decoding
//!
//! Turns a compressed audio file (WAV, MP3, FLAC, OGG, M4A, ...) into the
//! normalized mono buffer the upload path streams. The expensive work
//! happens exactly once per clip: decode once, resample once, peak
//! normalize once. The result is shared behind an `Arc` so a retry can
//! restream the same buffer without touching the file again.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::debug;

use crate::audio::pcm;
use crate::error::{AppError, Result};

/// A decoded, resampled and peak-normalized clip ready for streaming.
#[derive(Debug, Clone)]
pub struct UploadClip {
    /// Mono samples at the input (send) rate
    pub samples: Arc<Vec<f32>>,
    /// Rate the samples are stored at
    pub sample_rate: u32,
    /// Native rate of the source file, before conversion
    pub source_rate: u32,
    /// Display name for logs and events
    pub name: String,
}

impl UploadClip {
    /// Clip length in seconds
    pub fn duration_secs(&self) -> f64 {
        pcm::duration_secs(self.samples.len(), self.sample_rate)
    }

    /// Number of upload chunks this clip splits into (last one short)
    pub fn chunk_count(&self, chunk_samples: usize) -> usize {
        self.samples.len().div_ceil(chunk_samples)
    }
}

/// Decode a file from disk. The extension (if any) seeds the format probe.
pub fn load_clip_file(path: &Path, target_rate: u32, peak_ceiling: f32) -> Result<UploadClip> {
    let data = Bytes::from(std::fs::read(path)?);
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_string);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("clip")
        .to_string();
    load_clip_bytes(data, extension.as_deref(), &name, target_rate, peak_ceiling)
}

/// Decode an in-memory file buffer into an [`UploadClip`].
///
/// Any decode problem maps to [`AppError::DecodeFailed`]; callers treat
/// that as terminal for the job (decode failures are never retried).
pub fn load_clip_bytes(
    data: Bytes,
    extension: Option<&str>,
    name: &str,
    target_rate: u32,
    peak_ceiling: f32,
) -> Result<UploadClip> {
    let (channels, source_rate) = decode_all_channels(data, extension)?;

    let mono = pcm::downmix_mono(&channels);
    if mono.is_empty() {
        return Err(AppError::DecodeFailed(format!(
            "no audio samples decoded from '{name}'"
        )));
    }

    let mut samples = pcm::resample(&mono, source_rate, target_rate)?;
    pcm::peak_normalize(&mut samples, peak_ceiling);

    debug!(
        name,
        source_rate,
        target_rate,
        samples = samples.len(),
        "clip decoded"
    );

    Ok(UploadClip {
        samples: Arc::new(samples),
        sample_rate: target_rate,
        source_rate,
        name: name.to_string(),
    })
}

fn conv<T>(channels: &mut Vec<Vec<f32>>, data: Cow<AudioBuffer<T>>)
where
    T: Sample,
    f32: FromSample<T>,
{
    for (ch, out) in channels.iter_mut().enumerate() {
        out.extend(data.chan(ch).iter().map(|v| f32::from_sample(*v)));
    }
}

/// Run the symphonia probe/decode loop, returning per-channel samples and
/// the native sample rate.
fn decode_all_channels(data: Bytes, extension: Option<&str>) -> Result<(Vec<Vec<f32>>, u32)> {
    let cursor = std::io::Cursor::new(data);
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .map_err(|e| AppError::DecodeFailed(format!("unrecognized format: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AppError::DecodeFailed("no supported audio track".to_string()))?;

    let dec_opts: DecoderOptions = Default::default();
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &dec_opts)
        .map_err(|e| AppError::DecodeFailed(format!("unsupported codec: {e}")))?;

    let track_id = track.id;
    let source_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AppError::DecodeFailed("source sample rate unknown".to_string()))?;

    let mut channels: Vec<Vec<f32>> = Vec::new();

    while let Ok(packet) = format.next_packet() {
        while !format.metadata().is_latest() {
            format.metadata().pop();
        }

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| AppError::DecodeFailed(format!("decode: {e}")))?;

        if channels.is_empty() {
            channels = vec![Vec::new(); decoded.spec().channels.count()];
        }

        match decoded {
            AudioBufferRef::F32(buf) => {
                for (ch, out) in channels.iter_mut().enumerate() {
                    out.extend(buf.chan(ch));
                }
            }
            AudioBufferRef::U8(data) => conv(&mut channels, data),
            AudioBufferRef::U16(data) => conv(&mut channels, data),
            AudioBufferRef::U24(data) => conv(&mut channels, data),
            AudioBufferRef::U32(data) => conv(&mut channels, data),
            AudioBufferRef::S8(data) => conv(&mut channels, data),
            AudioBufferRef::S16(data) => conv(&mut channels, data),
            AudioBufferRef::S24(data) => conv(&mut channels, data),
            AudioBufferRef::S32(data) => conv(&mut channels, data),
            AudioBufferRef::F64(data) => conv(&mut channels, data),
        }
    }

    Ok((channels, source_rate))
}
