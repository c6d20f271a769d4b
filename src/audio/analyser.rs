//! Visualization taps
//!
//! The external visualizer reads a rolling window of recent samples from
//! an [`AnalyserSink`]; pixel drawing happens elsewhere. Both the live
//! input path and the playback path push into a tap of their own.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Receiver for visualization samples.
pub trait AnalyserSink: Send + Sync {
    /// Push a block of mono samples at the given rate.
    fn push(&self, samples: &[f32], sample_rate: u32);
}

/// Default window size in samples (~a quarter second at 16 kHz)
const DEFAULT_WINDOW: usize = 4096;

/// Feeder block size in samples
const FEED_BLOCK: usize = 2048;

/// Rolling sample window behind a lock, one per visualizer pane.
pub struct SpectrumTap {
    window: Mutex<VecDeque<f32>>,
    capacity: usize,
}

impl SpectrumTap {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WINDOW)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Copy of the current window, oldest sample first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.window.lock().iter().copied().collect()
    }

    /// RMS level of the current window (0.0 when empty).
    pub fn level(&self) -> f32 {
        let window = self.window.lock();
        if window.is_empty() {
            return 0.0;
        }
        let sum: f32 = window.iter().map(|s| s * s).sum();
        (sum / window.len() as f32).sqrt()
    }
}

impl Default for SpectrumTap {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyserSink for SpectrumTap {
    fn push(&self, samples: &[f32], _sample_rate: u32) {
        let mut window = self.window.lock();
        for &s in samples {
            if window.len() == self.capacity {
                window.pop_front();
            }
            window.push_back(s);
        }
    }
}

/// Tap that discards everything (headless runs and tests).
pub struct NullAnalyser;

impl AnalyserSink for NullAnalyser {
    fn push(&self, _samples: &[f32], _sample_rate: u32) {}
}

/// Push a whole clip through a tap at `factor` times realtime.
///
/// Used during uploads so the visualizer shows the outgoing clip quickly;
/// the samples never reach an audible output. Returns when the clip is
/// exhausted or the token is cancelled.
pub async fn accelerated_feed(
    tap: Arc<dyn AnalyserSink>,
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    factor: f64,
    cancel: CancellationToken,
) {
    let block_secs = FEED_BLOCK as f64 / sample_rate as f64;
    let pace = Duration::from_secs_f64(block_secs / factor.max(0.1));

    for block in samples.chunks(FEED_BLOCK) {
        if cancel.is_cancelled() {
            trace!("accelerated feed cancelled");
            return;
        }
        tap.push(block, sample_rate);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(pace) => {}
        }
    }
}
