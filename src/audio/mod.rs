//! Audio pipeline module
//!
//! This module provides:
//! - PCM utilities: resampling, peak normalization, wire codec
//! - Clip decoding for file uploads
//! - Capture sources (live microphone and decoded clips)
//! - Gapless playback scheduling over an output sink
//! - Visualization taps fed by both directions

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::AudioConfig;
use crate::error::{AppError, Result};

pub mod analyser;
pub mod capture;
pub mod clip;
pub mod pcm;
pub mod playback;

pub use analyser::{AnalyserSink, NullAnalyser, SpectrumTap};
pub use capture::{
    AudioFrame, BoxedCaptureSource, CaptureSource, ClipSource, MicSource, SourceKind,
};
pub use clip::UploadClip;
pub use pcm::RateConverter;
pub use playback::{AudioSink, CpalSink, NullSink, PlaybackScheduler};

/// Factory for the audio devices a session uses.
///
/// The session controller opens fresh devices on every connect and drops
/// them on disconnect. Opening capture never fails here; a missing or
/// denied microphone surfaces when the source is started, so the session
/// can continue without it. A sink that cannot open is fatal to the
/// connection attempt.
pub trait AudioSystem: Send + Sync {
    /// Create the microphone source wired to the input visualization tap
    fn open_capture(&self, tap: Arc<dyn AnalyserSink>) -> BoxedCaptureSource;

    /// Open the playback sink
    fn open_sink(&self) -> Result<Arc<dyn AudioSink>>;
}

/// Production audio system backed by cpal devices
pub struct CpalAudio {
    config: AudioConfig,
}

impl CpalAudio {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl AudioSystem for CpalAudio {
    fn open_capture(&self, tap: Arc<dyn AnalyserSink>) -> BoxedCaptureSource {
        Box::new(MicSource::new(
            self.config.input_device.clone(),
            self.config.mic_frame_samples,
            self.config.input_sample_rate,
            tap,
        ))
    }

    fn open_sink(&self) -> Result<Arc<dyn AudioSink>> {
        Ok(Arc::new(CpalSink::open(
            self.config.output_device.as_deref(),
        )?))
    }
}

/// Audio system for headless runs: no microphone, clock-only sink
pub struct NullAudio;

impl AudioSystem for NullAudio {
    fn open_capture(&self, _tap: Arc<dyn AnalyserSink>) -> BoxedCaptureSource {
        Box::new(NoMic)
    }

    fn open_sink(&self) -> Result<Arc<dyn AudioSink>> {
        Ok(Arc::new(NullSink::new()))
    }
}

/// Capture stub that reports no microphone
struct NoMic;

#[async_trait]
impl CaptureSource for NoMic {
    fn kind(&self) -> SourceKind {
        SourceKind::Mic
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        Err(AppError::MicUnavailable("audio disabled".to_string()))
    }

    async fn stop(&mut self) {}

    fn is_active(&self) -> bool {
        false
    }
}
