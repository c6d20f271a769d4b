//! Capture sources
//!
//! One production interface for everything that produces outbound audio
//! frames. Two variants exist:
//! - [`MicSource`]: the live microphone, framed at the device's native
//!   rate and resampled to the send rate on the fly
//! - [`ClipSource`]: a decoded upload clip, sliced into send-rate chunks
//!
//! Both feed the input visualization tap so the UI always has live data
//! while audio is being produced.

use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::audio::analyser::AnalyserSink;
use crate::audio::clip::UploadClip;
use crate::audio::pcm::RateConverter;
use crate::error::{AppError, Result};

/// Raw blocks buffered between the device callback and the bridge task
const RAW_CHANNEL_CAPACITY: usize = 64;

/// Converted frames buffered towards the consumer
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Which variant produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Live microphone
    Mic,
    /// Decoded upload clip
    Clip,
}

impl SourceKind {
    pub fn name_str(&self) -> &'static str {
        match self {
            Self::Mic => "mic",
            Self::Clip => "clip",
        }
    }
}

/// One mono audio frame ready for the send path
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono samples at `sample_rate`
    pub samples: Vec<f32>,
    /// Rate the samples are stored at
    pub sample_rate: u32,
    /// Variant that produced the frame
    pub source: SourceKind,
    /// Frame counter within this source's lifetime
    pub sequence: u64,
}

impl AudioFrame {
    /// Frame length in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Producer of outbound audio frames.
#[async_trait]
pub trait CaptureSource: Send {
    /// Which variant this is
    fn kind(&self) -> SourceKind;

    /// Begin producing frames. Returns the receiving end of the frame
    /// stream; the channel closes when the source ends or is stopped.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop producing frames and release the device. Never fails;
    /// problems during teardown are logged.
    async fn stop(&mut self);

    /// Whether the source is currently producing frames
    fn is_active(&self) -> bool;
}

/// Boxed source for struct fields that hold either variant
pub type BoxedCaptureSource = Box<dyn CaptureSource>;

/// Live microphone capture via cpal.
///
/// The stream lives on a dedicated thread (cpal streams are not `Send`).
/// The device callback mixes to mono and slices fixed-size blocks at the
/// native rate; a bridge task feeds the visualization tap and converts to
/// the send rate.
pub struct MicSource {
    device_name: Option<String>,
    frame_samples: usize,
    target_rate: u32,
    tap: Arc<dyn AnalyserSink>,
    cancel: Option<CancellationToken>,
    keepalive: Option<std::sync::mpsc::Sender<()>>,
    bridge: Option<JoinHandle<()>>,
}

impl MicSource {
    pub fn new(
        device_name: Option<String>,
        frame_samples: usize,
        target_rate: u32,
        tap: Arc<dyn AnalyserSink>,
    ) -> Self {
        Self {
            device_name,
            frame_samples,
            target_rate,
            tap,
            cancel: None,
            keepalive: None,
            bridge: None,
        }
    }
}

/// Result of opening the device on the stream-owner thread
struct MicOpened {
    native_rate: u32,
}

/// Open the microphone and run the stream until the keepalive drops.
///
/// Runs on the dedicated thread. The setup outcome is reported through
/// `setup_tx` so the caller can surface device problems as recoverable
/// errors.
fn run_mic_thread(
    device_name: Option<String>,
    frame_samples: usize,
    raw_tx: mpsc::Sender<Vec<f32>>,
    setup_tx: oneshot::Sender<Result<MicOpened>>,
    end_on_drop_rx: std::sync::mpsc::Receiver<()>,
) {
    let host = cpal::default_host();

    let device = match device_name.as_deref() {
        Some(name) => host
            .input_devices()
            .ok()
            .and_then(|mut devices| devices.find(|d| d.name().map(|n| n == name).unwrap_or(false)))
            .or_else(|| {
                warn!(name, "input device not found, trying default");
                host.default_input_device()
            }),
        None => host.default_input_device(),
    };

    let Some(device) = device else {
        let _ = setup_tx.send(Err(AppError::MicUnavailable(
            "no input device available".to_string(),
        )));
        return;
    };

    let supported = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = setup_tx.send(Err(AppError::MicUnavailable(format!("input config: {e}"))));
            return;
        }
    };

    let native_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let stream_config = supported.config();

    if let Ok(name) = device.name() {
        info!(name, native_rate, channels, "microphone opened");
    }

    // Callback state: accumulate mono samples, emit fixed-size blocks
    let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if channels == 1 {
                pending.extend_from_slice(data);
            } else {
                for frame in data.chunks_exact(channels) {
                    pending.push(frame.iter().sum::<f32>() / channels as f32);
                }
            }

            while pending.len() >= frame_samples {
                let block: Vec<f32> = pending.drain(..frame_samples).collect();
                match raw_tx.try_send(block) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        trace!("mic block dropped, bridge is behind");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        },
        |err| error!("input stream error: {err}"),
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = setup_tx.send(Err(AppError::MicUnavailable(format!(
                "build input stream: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = setup_tx.send(Err(AppError::MicUnavailable(format!(
            "start input stream: {e}"
        ))));
        return;
    }

    let _ = setup_tx.send(Ok(MicOpened { native_rate }));

    // Block to keep the stream alive until the source is stopped
    end_on_drop_rx.recv().ok();
    debug!("microphone stream released");
}

#[async_trait]
impl CaptureSource for MicSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Mic
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<f32>>(RAW_CHANNEL_CAPACITY);
        let (setup_tx, setup_rx) = oneshot::channel();
        let (end_on_drop_tx, end_on_drop_rx) = std::sync::mpsc::channel::<()>();

        let device_name = self.device_name.clone();
        let frame_samples = self.frame_samples;
        std::thread::spawn(move || {
            run_mic_thread(device_name, frame_samples, raw_tx, setup_tx, end_on_drop_rx);
        });

        let opened = match setup_rx.await {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(AppError::MicUnavailable(
                    "capture thread exited during setup".to_string(),
                ))
            }
        };

        let mut converter = RateConverter::new(opened.native_rate, self.target_rate)?;
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let tap = self.tap.clone();
        let native_rate = opened.native_rate;
        let bridge_cancel = cancel.clone();

        let bridge = tokio::spawn(async move {
            let mut sequence = 0u64;
            loop {
                let block = tokio::select! {
                    _ = bridge_cancel.cancelled() => break,
                    block = raw_rx.recv() => match block {
                        Some(b) => b,
                        None => break,
                    },
                };

                // The tap sees raw native-rate audio even while the send
                // path is muted
                tap.push(&block, native_rate);

                let samples = match converter.process(&block) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("mic resample failed: {e}");
                        continue;
                    }
                };
                if samples.is_empty() {
                    continue;
                }

                let frame = AudioFrame {
                    samples,
                    sample_rate: converter.to_rate(),
                    source: SourceKind::Mic,
                    sequence,
                };
                sequence += 1;

                if frame_tx.send(frame).await.is_err() {
                    break;
                }
            }
            debug!("mic bridge task ended");
        });

        self.cancel = Some(cancel);
        self.keepalive = Some(end_on_drop_tx);
        self.bridge = Some(bridge);
        Ok(frame_rx)
    }

    async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        // Dropping the keepalive releases the stream-owner thread
        self.keepalive = None;
        if let Some(bridge) = self.bridge.take() {
            if let Err(e) = bridge.await {
                warn!("mic bridge join: {e}");
            }
        }
    }

    fn is_active(&self) -> bool {
        self.keepalive.is_some()
    }
}

/// Frame source over an already-decoded clip.
///
/// Yields consecutive send-rate chunks as fast as the consumer accepts
/// them; pacing is the consumer's concern.
pub struct ClipSource {
    clip: UploadClip,
    chunk_samples: usize,
    task: Option<JoinHandle<()>>,
}

impl ClipSource {
    pub fn new(clip: UploadClip, chunk_samples: usize) -> Self {
        Self {
            clip,
            chunk_samples,
            task: None,
        }
    }
}

#[async_trait]
impl CaptureSource for ClipSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Clip
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let samples = self.clip.samples.clone();
        let sample_rate = self.clip.sample_rate;
        let chunk_samples = self.chunk_samples;

        let task = tokio::spawn(async move {
            for (sequence, chunk) in samples.chunks(chunk_samples).enumerate() {
                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate,
                    source: SourceKind::Clip,
                    sequence: sequence as u64,
                };
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_active(&self) -> bool {
        self.task.is_some()
    }
}
