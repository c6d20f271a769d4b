//! Playback scheduling
//!
//! Model audio arrives as discrete chunks that must play back-to-back
//! with no gaps. The scheduler keeps a monotonic "next start time" cursor
//! in the sink's clock domain:
//! - each chunk starts at `max(cursor, now)`,
//! - the cursor advances by the chunk's duration,
//! - an interruption resets the cursor so the next chunk starts
//!   immediately.
//!
//! Sources already handed to the sink keep playing after a reset; the
//! sink mixes whatever overlaps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::audio::analyser::AnalyserSink;
use crate::audio::pcm;
use crate::error::{AppError, Result};

/// Playback primitive with a monotonic clock.
///
/// Implementations mix overlapping scheduled buffers and retire them as
/// they finish.
pub trait AudioSink: Send + Sync {
    /// Current position of the playback clock in seconds.
    fn now(&self) -> f64;

    /// Schedule mono samples to start at `at` seconds on this sink's
    /// clock. A start time in the past plays the remaining portion
    /// immediately.
    fn schedule(&self, samples: Arc<Vec<f32>>, sample_rate: u32, at: f64) -> Result<()>;
}

/// Gapless chunk scheduler over an [`AudioSink`].
pub struct PlaybackScheduler {
    sink: Arc<dyn AudioSink>,
    tap: Arc<dyn AnalyserSink>,
    cursor: Mutex<Option<f64>>,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn AudioSink>, tap: Arc<dyn AnalyserSink>) -> Self {
        Self {
            sink,
            tap,
            cursor: Mutex::new(None),
        }
    }

    /// Schedule a chunk for gapless playback, returning its start time.
    ///
    /// The cursor never moves backwards between resets; if the device
    /// clock has drifted past it (an underrun), the chunk starts at the
    /// clock instead and the cursor snaps forward.
    pub fn enqueue(&self, samples: Arc<Vec<f32>>, sample_rate: u32) -> Result<f64> {
        let duration = pcm::duration_secs(samples.len(), sample_rate);
        let now = self.sink.now();

        let start = {
            let mut cursor = self.cursor.lock();
            let start = cursor.unwrap_or(now).max(now);
            self.sink.schedule(samples.clone(), sample_rate, start)?;
            *cursor = Some(start + duration);
            start
        };

        self.tap.push(&samples, sample_rate);
        trace!(start, duration, "chunk scheduled");
        Ok(start)
    }

    /// Forget the cursor so the next chunk starts immediately.
    ///
    /// Called on an interruption signal. Audio already scheduled is not
    /// cancelled and may overlap the next chunk.
    pub fn reset(&self) {
        *self.cursor.lock() = None;
        debug!("playback cursor reset");
    }

    /// Current cursor value, if any chunk has been scheduled since the
    /// last reset.
    pub fn cursor(&self) -> Option<f64> {
        *self.cursor.lock()
    }
}

/// A buffer pinned to an absolute frame position on the device timeline.
struct ScheduledSource {
    start_frame: u64,
    samples: Vec<f32>,
}

/// Mix all active sources into one interleaved output buffer and advance
/// the frame counter. Sources that end before the new horizon are
/// retired.
fn mix_into(
    data: &mut [f32],
    channels: usize,
    frames_rendered: &AtomicU64,
    sources: &Mutex<Vec<ScheduledSource>>,
) {
    data.fill(0.0);
    let frames = data.len() / channels;
    let base = frames_rendered.load(Ordering::Acquire);
    let horizon = base + frames as u64;

    {
        let mut sources = sources.lock();
        for source in sources.iter() {
            let s_start = source.start_frame;
            let s_end = s_start + source.samples.len() as u64;
            let begin = base.max(s_start);
            let end = horizon.min(s_end);

            for g in begin..end {
                let v = source.samples[(g - s_start) as usize];
                let out = (g - base) as usize * channels;
                for ch in 0..channels {
                    data[out + ch] += v;
                }
            }
        }
        sources.retain(|s| s.start_frame + s.samples.len() as u64 > horizon);
    }

    for v in data.iter_mut() {
        *v = v.clamp(-1.0, 1.0);
    }

    frames_rendered.store(horizon, Ordering::Release);
}

/// Speaker output via cpal.
///
/// A dedicated thread owns the stream (cpal streams are not `Send`); the
/// callback mixes scheduled sources sample-accurately. The clock is the
/// number of frames rendered so far, so `now()` only advances while the
/// stream runs.
pub struct CpalSink {
    device_rate: u32,
    frames_rendered: Arc<AtomicU64>,
    sources: Arc<Mutex<Vec<ScheduledSource>>>,
    /// Dropping this releases the stream-owner thread
    _keepalive: std::sync::mpsc::Sender<()>,
}

impl CpalSink {
    /// Open the named output device, or the system default.
    pub fn open(preferred: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match preferred {
            Some(name) => {
                let found = host
                    .output_devices()
                    .map_err(|e| AppError::AudioError(format!("enumerate outputs: {e}")))?
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false));
                match found {
                    Some(d) => d,
                    None => {
                        warn!(name, "output device not found, using default");
                        host.default_output_device().ok_or_else(|| {
                            AppError::AudioError("no output device available".to_string())
                        })?
                    }
                }
            }
            None => host.default_output_device().ok_or_else(|| {
                AppError::AudioError("no output device available".to_string())
            })?,
        };

        let supported = device
            .default_output_config()
            .map_err(|e| AppError::AudioError(format!("output config: {e}")))?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let stream_config = supported.config();

        if let Ok(name) = device.name() {
            info!(name, device_rate, channels, "output device opened");
        }

        let frames_rendered = Arc::new(AtomicU64::new(0));
        let sources: Arc<Mutex<Vec<ScheduledSource>>> = Arc::new(Mutex::new(Vec::new()));
        let (setup_tx, setup_rx) = std::sync::mpsc::channel::<Result<()>>();
        let (end_on_drop_tx, end_on_drop_rx) = std::sync::mpsc::channel::<()>();

        let cb_frames = frames_rendered.clone();
        let cb_sources = sources.clone();

        std::thread::spawn(move || {
            let stream = device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    mix_into(data, channels, &cb_frames, &cb_sources);
                },
                |error| error!("output stream error: {error}"),
                Some(Duration::from_millis(100)),
            );

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = setup_tx.send(Err(AppError::AudioError(format!(
                        "build output stream: {e}"
                    ))));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = setup_tx.send(Err(AppError::AudioError(format!(
                    "start output stream: {e}"
                ))));
                return;
            }

            let _ = setup_tx.send(Ok(()));

            // Block to keep the stream alive until the sink is dropped
            end_on_drop_rx.recv().ok();
            debug!("output stream released");
        });

        match setup_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(AppError::AudioError(
                    "playback thread exited during setup".to_string(),
                ))
            }
        }

        Ok(Self {
            device_rate,
            frames_rendered,
            sources,
            _keepalive: end_on_drop_tx,
        })
    }
}

impl AudioSink for CpalSink {
    fn now(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn schedule(&self, samples: Arc<Vec<f32>>, sample_rate: u32, at: f64) -> Result<()> {
        let device_samples = if sample_rate == self.device_rate {
            samples.as_ref().clone()
        } else {
            pcm::resample(&samples, sample_rate, self.device_rate)?
        };

        let start_frame = (at.max(0.0) * self.device_rate as f64).round() as u64;
        self.sources.lock().push(ScheduledSource {
            start_frame,
            samples: device_samples,
        });
        Ok(())
    }
}

/// Clock-only sink for headless runs. Scheduled audio is discarded.
pub struct NullSink {
    started: Instant,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullSink {
    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn schedule(&self, samples: Arc<Vec<f32>>, sample_rate: u32, at: f64) -> Result<()> {
        trace!(
            samples = samples.len(),
            sample_rate,
            at,
            "discarding scheduled audio (null sink)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::analyser::{NullAnalyser, SpectrumTap};

    /// Sink with a manually advanced clock that records schedule calls.
    struct FakeSink {
        clock: Mutex<f64>,
        scheduled: Mutex<Vec<(f64, usize)>>,
    }

    impl FakeSink {
        fn new() -> Self {
            Self {
                clock: Mutex::new(0.0),
                scheduled: Mutex::new(Vec::new()),
            }
        }

        fn advance(&self, secs: f64) {
            *self.clock.lock() += secs;
        }

        fn starts(&self) -> Vec<f64> {
            self.scheduled.lock().iter().map(|(at, _)| *at).collect()
        }
    }

    impl AudioSink for FakeSink {
        fn now(&self) -> f64 {
            *self.clock.lock()
        }

        fn schedule(&self, samples: Arc<Vec<f32>>, _sample_rate: u32, at: f64) -> Result<()> {
            self.scheduled.lock().push((at, samples.len()));
            Ok(())
        }
    }

    fn chunk(secs: f64) -> Arc<Vec<f32>> {
        Arc::new(vec![0.1; (secs * 24_000.0) as usize])
    }

    #[test]
    fn test_consecutive_chunks_are_gapless() {
        let sink = Arc::new(FakeSink::new());
        sink.advance(10.0);
        let scheduler = PlaybackScheduler::new(sink.clone(), Arc::new(NullAnalyser));

        let first = scheduler.enqueue(chunk(1.0), 24_000).unwrap();
        let second = scheduler.enqueue(chunk(0.5), 24_000).unwrap();
        let third = scheduler.enqueue(chunk(0.25), 24_000).unwrap();

        assert_eq!(first, 10.0);
        assert_eq!(second, 11.0);
        assert_eq!(third, 11.5);
        assert_eq!(sink.starts(), vec![10.0, 11.0, 11.5]);
    }

    #[test]
    fn test_chunk_never_starts_before_clock() {
        let sink = Arc::new(FakeSink::new());
        let scheduler = PlaybackScheduler::new(sink.clone(), Arc::new(NullAnalyser));

        scheduler.enqueue(chunk(0.1), 24_000).unwrap();
        // Clock drifts past the cursor (underrun)
        sink.advance(5.0);
        let start = scheduler.enqueue(chunk(0.1), 24_000).unwrap();

        assert_eq!(start, 5.0);
        assert_eq!(scheduler.cursor(), Some(5.1));
    }

    #[test]
    fn test_reset_starts_next_chunk_immediately() {
        let sink = Arc::new(FakeSink::new());
        let scheduler = PlaybackScheduler::new(sink.clone(), Arc::new(NullAnalyser));

        // Build up a long queue of pending audio
        for _ in 0..20 {
            scheduler.enqueue(chunk(1.0), 24_000).unwrap();
        }
        assert_eq!(scheduler.cursor(), Some(20.0));

        sink.advance(2.0);
        scheduler.reset();
        assert_eq!(scheduler.cursor(), None);

        let start = scheduler.enqueue(chunk(1.0), 24_000).unwrap();
        assert_eq!(start, 2.0);
        assert!(start <= 20.0);
    }

    #[test]
    fn test_enqueue_tees_to_analyser() {
        let sink = Arc::new(FakeSink::new());
        let tap = Arc::new(SpectrumTap::with_capacity(1 << 20));
        let scheduler = PlaybackScheduler::new(sink, tap.clone());

        scheduler.enqueue(chunk(0.5), 24_000).unwrap();
        assert_eq!(tap.snapshot().len(), 12_000);
    }

    #[test]
    fn test_mix_into_sums_overlapping_sources() {
        let frames_rendered = AtomicU64::new(0);
        let sources = Mutex::new(vec![
            ScheduledSource {
                start_frame: 0,
                samples: vec![0.25; 8],
            },
            ScheduledSource {
                start_frame: 4,
                samples: vec![0.25; 8],
            },
        ]);

        let mut data = vec![0.0f32; 16]; // 8 frames, 2 channels
        mix_into(&mut data, 2, &frames_rendered, &sources);

        // Frames 0-3: single source; frames 4-7: both overlap
        assert!((data[0] - 0.25).abs() < 1e-6);
        assert!((data[7] - 0.25).abs() < 1e-6);
        assert!((data[8] - 0.5).abs() < 1e-6);
        assert!((data[15] - 0.5).abs() < 1e-6);
        assert_eq!(frames_rendered.load(Ordering::Acquire), 8);

        // First source is exhausted, second still has 4 frames left
        assert_eq!(sources.lock().len(), 1);
    }

    #[test]
    fn test_mix_into_skips_past_portion_of_late_source() {
        let frames_rendered = AtomicU64::new(100);
        let sources = Mutex::new(vec![ScheduledSource {
            start_frame: 96,
            samples: vec![0.5; 8],
        }]);

        let mut data = vec![0.0f32; 8]; // 8 frames, 1 channel
        mix_into(&mut data, 1, &frames_rendered, &sources);

        // Only the remaining 4 samples of the source land in this buffer
        assert!((data[0] - 0.5).abs() < 1e-6);
        assert!((data[3] - 0.5).abs() < 1e-6);
        assert_eq!(data[4], 0.0);
        assert!(sources.lock().is_empty());
    }

    #[test]
    fn test_mix_output_is_clamped() {
        let frames_rendered = AtomicU64::new(0);
        let sources = Mutex::new(vec![
            ScheduledSource {
                start_frame: 0,
                samples: vec![0.9; 4],
            },
            ScheduledSource {
                start_frame: 0,
                samples: vec![0.9; 4],
            },
        ]);

        let mut data = vec![0.0f32; 4];
        mix_into(&mut data, 1, &frames_rendered, &sources);
        assert!(data.iter().all(|&v| v <= 1.0));
    }

    #[test]
    fn test_null_sink_clock_advances() {
        let sink = NullSink::new();
        let a = sink.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(sink.now() > a);
        sink.schedule(Arc::new(vec![0.0; 16]), 24_000, 0.0).unwrap();
    }
}
