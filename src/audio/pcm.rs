//! PCM sample primitives
//!
//! Pure sample manipulation shared by the capture, playback and upload
//! paths:
//! - Sample rate conversion (persistent streaming converter and one-shot)
//! - The base64 16-bit PCM wire envelope
//! - Peak normalization
//! - Channel downmix
//!
//! No I/O happens here; everything operates on in-memory f32 buffers in
//! the -1.0..1.0 range.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{AppError, Result};

/// Sample rate of audio sent to the service (mono PCM)
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio received from the service (mono PCM)
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Fixed input block size for the streaming converter
const CONVERTER_CHUNK_SIZE: usize = 1024;

/// Scale factor between f32 samples and i16 wire samples.
///
/// Symmetric in both directions so that decode followed by encode is
/// byte-exact (every i16 is exactly representable as f32).
const I16_SCALE: f32 = 32768.0;

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Streaming sample rate converter for one mono channel.
///
/// Wraps a persistent `SincFixedIn` and buffers input internally so
/// callers can push blocks of any size; output is returned as it becomes
/// available. When the input and output rates are equal the converter is
/// a pass-through and buffers nothing.
pub struct RateConverter {
    from: u32,
    to: u32,
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl RateConverter {
    /// Create a converter from `from` Hz to `to` Hz.
    pub fn new(from: u32, to: u32) -> Result<Self> {
        let inner = if from == to {
            None
        } else {
            let ratio = to as f64 / from as f64;
            let resampler =
                SincFixedIn::<f32>::new(ratio, 2.0, sinc_params(), CONVERTER_CHUNK_SIZE, 1)
                    .map_err(|e| AppError::AudioError(format!("resampler init: {e}")))?;
            Some(resampler)
        };

        Ok(Self {
            from,
            to,
            inner,
            pending: Vec::with_capacity(CONVERTER_CHUNK_SIZE * 2),
        })
    }

    /// Input sample rate in Hz
    pub fn from_rate(&self) -> u32 {
        self.from
    }

    /// Output sample rate in Hz
    pub fn to_rate(&self) -> u32 {
        self.to
    }

    /// Push a block of samples, returning whatever converted output is
    /// ready. Partial blocks are held until enough input accumulates.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            // Equal rates: exact identity, nothing buffered
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);

        let full_chunks = self.pending.len() / CONVERTER_CHUNK_SIZE;
        let remainder = self.pending.len() % CONVERTER_CHUNK_SIZE;
        let mut output = Vec::new();

        for chunk in 0..full_chunks {
            let block =
                &self.pending[chunk * CONVERTER_CHUNK_SIZE..(chunk + 1) * CONVERTER_CHUNK_SIZE];
            let waves = resampler
                .process(&[block], None)
                .map_err(|e| AppError::AudioError(format!("resample: {e}")))?;
            output.extend_from_slice(&waves[0]);
        }

        if remainder == 0 {
            self.pending.clear();
        } else {
            self.pending.copy_within(full_chunks * CONVERTER_CHUNK_SIZE.., 0);
            self.pending.truncate(remainder);
        }

        Ok(output)
    }

    /// Drain buffered input by zero-padding the final partial block.
    ///
    /// Call once when the stream ends; the converter stays usable but its
    /// filter history now contains the padding.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        self.pending.resize(CONVERTER_CHUNK_SIZE, 0.0);
        let waves = resampler
            .process(&[&self.pending], None)
            .map_err(|e| AppError::AudioError(format!("resample flush: {e}")))?;
        self.pending.clear();
        Ok(waves.into_iter().next().unwrap_or_default())
    }
}

/// One-shot sample rate conversion for a whole mono buffer.
///
/// Equal rates return the input unchanged. Empty input returns empty
/// output.
pub fn resample(input: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    if from == to {
        return Ok(input.to_vec());
    }

    let ratio = to as f64 / from as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, sinc_params(), input.len(), 1)
        .map_err(|e| AppError::AudioError(format!("resampler init: {e}")))?;

    let waves = resampler
        .process(&[input], None)
        .map_err(|e| AppError::AudioError(format!("resample: {e}")))?;

    Ok(waves.into_iter().next().unwrap_or_default())
}

/// Encode f32 samples as a base64 16-bit little-endian PCM envelope.
pub fn encode_envelope(samples: &[f32]) -> String {
    let mut pcm: Vec<i16> = Vec::with_capacity(samples.len());
    for &s in samples {
        let v = (s * I16_SCALE)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32);
        pcm.push(v as i16);
    }
    BASE64.encode(bytemuck::cast_slice::<i16, u8>(&pcm))
}

/// Decode a base64 16-bit little-endian PCM envelope into f32 samples.
pub fn decode_envelope(data: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| AppError::DecodeFailed(format!("invalid base64: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(AppError::DecodeFailed(
            "odd byte count in PCM payload".to_string(),
        ));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / I16_SCALE)
        .collect())
}

/// Scale samples so the loudest peak sits at `ceiling`.
///
/// A silent buffer is left untouched.
pub fn peak_normalize(samples: &mut [f32], ceiling: f32) {
    let mut max = 0.0f32;
    for &s in samples.iter() {
        let a = s.abs();
        if a > max {
            max = a;
        }
    }

    if max > 0.0 {
        let scale = ceiling / max;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }
}

/// Average an arbitrary number of channels down to one.
pub fn downmix_mono(channels: &[Vec<f32>]) -> Vec<f32> {
    match channels.len() {
        0 => Vec::new(),
        1 => channels[0].clone(),
        n => {
            let len = channels.iter().map(|c| c.len()).min().unwrap_or(0);
            let scale = 1.0 / n as f32;
            (0..len)
                .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() * scale)
                .collect()
        }
    }
}

/// Duration in seconds of a sample buffer at the given rate.
pub fn duration_secs(samples: usize, sample_rate: u32) -> f64 {
    samples as f64 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, freq: f32, rate: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_resample_identity_at_equal_rates() {
        let input = sine(2048, 440.0, 16_000.0);
        let output = resample(&input, 16_000, 16_000).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_resample_empty_input() {
        assert!(resample(&[], 44_100, 16_000).unwrap().is_empty());
    }

    #[test]
    fn test_resample_length_follows_ratio() {
        let input = sine(44_100, 440.0, 44_100.0);
        let output = resample(&input, 44_100, 16_000).unwrap();
        // Sinc filtering may shave a few samples either side of the exact ratio
        let expected = 16_000i64;
        assert!(
            (output.len() as i64 - expected).abs() < 300,
            "expected ~{expected}, got {}",
            output.len()
        );
    }

    #[test]
    fn test_converter_identity_passthrough() {
        let mut conv = RateConverter::new(24_000, 24_000).unwrap();
        let input = sine(333, 440.0, 24_000.0);
        assert_eq!(conv.process(&input).unwrap(), input);
        assert!(conv.flush().unwrap().is_empty());
    }

    #[test]
    fn test_converter_buffers_partial_blocks() {
        let mut conv = RateConverter::new(48_000, 16_000).unwrap();
        // Below one block: everything stays buffered
        let out = conv.process(&sine(512, 440.0, 48_000.0)).unwrap();
        assert!(out.is_empty());
        // Second half completes the block and produces output
        let out = conv.process(&sine(512, 440.0, 48_000.0)).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn test_converter_streaming_total_length() {
        let mut conv = RateConverter::new(48_000, 16_000).unwrap();
        let mut total = 0usize;
        for _ in 0..12 {
            total += conv.process(&sine(4096, 330.0, 48_000.0)).unwrap().len();
        }
        total += conv.flush().unwrap().len();
        // 12 * 4096 input samples at a 1/3 ratio
        let expected = (12 * 4096) / 3;
        assert!(
            (total as i64 - expected as i64).abs() < 600,
            "expected ~{expected}, got {total}"
        );
    }

    #[test]
    fn test_envelope_roundtrip_preserves_quantization() {
        let samples: Vec<f32> = vec![0.0, 0.25, -0.25, 0.5, -0.99, 0.999];
        let encoded = encode_envelope(&samples);
        let decoded = decode_envelope(&encoded).unwrap();
        let reencoded = encode_envelope(&decoded);
        assert_eq!(encoded, reencoded);
    }

    #[test]
    fn test_envelope_clamps_out_of_range() {
        let encoded = encode_envelope(&[2.0, -2.0]);
        let decoded = decode_envelope(&encoded).unwrap();
        assert!((decoded[0] - (i16::MAX as f32 / I16_SCALE)).abs() < 1e-6);
        assert!((decoded[1] - (i16::MIN as f32 / I16_SCALE)).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_odd_byte_count() {
        let three_bytes = BASE64.encode([1u8, 2, 3]);
        let err = decode_envelope(&three_bytes).unwrap_err();
        assert!(matches!(err, AppError::DecodeFailed(_)));
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(decode_envelope("not!!base64??").is_err());
    }

    #[test]
    fn test_peak_normalize_scales_to_ceiling() {
        let mut samples = vec![0.1, -0.4, 0.2];
        peak_normalize(&mut samples, 0.95);
        let max = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((max - 0.95).abs() < 1e-6);
        // Relative shape preserved: scale factor is 0.95 / 0.4
        assert!((samples[0] - 0.1 * 0.95 / 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_peak_normalize_skips_silence() {
        let mut samples = vec![0.0; 128];
        peak_normalize(&mut samples, 0.95);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_downmix_mono_averages_channels() {
        let left = vec![1.0, 0.0, -1.0];
        let right = vec![0.0, 0.0, -1.0];
        let mono = downmix_mono(&[left, right]);
        assert_eq!(mono, vec![0.5, 0.0, -1.0]);
    }

    #[test]
    fn test_downmix_mono_single_channel_passthrough() {
        let channel = vec![0.3, -0.3];
        assert_eq!(downmix_mono(&[channel.clone()]), channel);
    }

    #[test]
    fn test_duration_secs() {
        assert!((duration_secs(16_000, INPUT_SAMPLE_RATE) - 1.0).abs() < 1e-9);
        assert!((duration_secs(12_000, OUTPUT_SAMPLE_RATE) - 0.5).abs() < 1e-9);
    }
}
