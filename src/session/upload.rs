//! Upload job and retry policy
//!
//! Streams a decoded clip over the current session's channel in paced
//! chunks with the microphone muted, then asks for a continuation with
//! a fixed text prompt. A transient failure buys exactly one full
//! teardown, reconnect, and restream of the same buffer.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::audio::analyser::accelerated_feed;
use crate::audio::capture::{CaptureSource, ClipSource};
use crate::audio::clip::UploadClip;
use crate::audio::pcm;
use crate::config::UploadConfig;
use crate::error::{AppError, Result};
use crate::live::wire::ClientEnvelope;
use crate::session::controller::SessionController;

/// Speed of the visualizer feed while a clip streams, relative to realtime
pub const UPLOAD_FEED_FACTOR: f64 = 5.0;

/// Phase of an upload job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Decoding and preparing the clip
    Decoding,
    /// Sending paced media chunks
    Streaming,
    /// Sending the continuation prompt
    Completing,
    /// The prompt was sent; the job is finished
    Done,
}

impl UploadState {
    pub fn name_str(&self) -> &'static str {
        match self {
            Self::Decoding => "decoding",
            Self::Streaming => "streaming",
            Self::Completing => "completing",
            Self::Done => "done",
        }
    }
}

/// Retry budget for one upload job.
///
/// Budget is consumed by [`RetryPolicy::allow_retry`]; once spent, every
/// further failure is final.
#[derive(Debug)]
pub struct RetryPolicy {
    attempts_made: u32,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempts_made: 0,
            max_retries,
        }
    }

    /// 1-based number of the attempt about to run (or running)
    pub fn attempt(&self) -> u32 {
        self.attempts_made + 1
    }

    /// Consume one unit of budget. Returns false once the budget is spent.
    pub fn allow_retry(&mut self) -> bool {
        if self.attempts_made < self.max_retries {
            self.attempts_made += 1;
            true
        } else {
            false
        }
    }
}

/// One upload of one decoded clip.
pub(crate) struct UploadJob<'a> {
    controller: &'a SessionController,
    config: UploadConfig,
    policy: RetryPolicy,
}

impl<'a> UploadJob<'a> {
    pub(crate) fn new(controller: &'a SessionController, config: UploadConfig) -> Self {
        let policy = RetryPolicy::new(config.max_retries);
        Self {
            controller,
            config,
            policy,
        }
    }

    /// Run the job to completion or final failure.
    ///
    /// The mute flag is cleared on every exit path.
    pub(crate) async fn run(mut self, clip: UploadClip) -> Result<()> {
        let result = self.drive(&clip).await;
        self.controller.set_muted(false);
        result
    }

    async fn drive(&mut self, clip: &UploadClip) -> Result<()> {
        loop {
            let attempt = self.policy.attempt();
            match self.stream_once(clip, attempt).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && self.policy.allow_retry() => {
                    warn!(attempt, "upload attempt failed, reconnecting: {e}");
                    if let Err(reconnect) = self.controller.connect().await {
                        return Err(AppError::UploadFailed(format!(
                            "reconnect after transient failure: {reconnect}"
                        )));
                    }
                }
                Err(e) => return Err(AppError::UploadFailed(e.to_string())),
            }
        }
    }

    /// One streaming attempt against the current session's channel.
    async fn stream_once(&self, clip: &UploadClip, attempt: u32) -> Result<()> {
        // Resolved per attempt so a retry lands on the fresh session
        let channel = self
            .controller
            .current_channel()
            .await
            .ok_or_else(|| AppError::StreamError("session not active".to_string()))?;

        // Mic frames are dropped from here until the job exits
        self.controller.set_muted(true);

        // Each attempt reads the clip through a fresh file-variant source
        let mut source = ClipSource::new(clip.clone(), self.config.chunk_samples);
        let mut frames = source.start().await?;

        let feed_cancel = CancellationToken::new();
        let feeder = tokio::spawn(accelerated_feed(
            self.controller.input_tap(),
            clip.samples.clone(),
            clip.sample_rate,
            UPLOAD_FEED_FACTOR,
            feed_cancel.clone(),
        ));

        self.controller
            .publish_upload_state(UploadState::Streaming, attempt);
        debug!(
            attempt,
            samples = clip.samples.len(),
            chunks = clip.chunk_count(self.config.chunk_samples),
            "upload streaming"
        );

        let result = async {
            let pace = self.config.pace();
            while let Some(frame) = frames.recv().await {
                if frame.sequence > 0 {
                    tokio::time::sleep(pace).await;
                }
                channel
                    .send(ClientEnvelope::media(pcm::encode_envelope(&frame.samples)))
                    .await?;
                trace!(attempt, chunk = frame.sequence, "upload chunk sent");
            }

            self.controller
                .publish_upload_state(UploadState::Completing, attempt);
            channel
                .send(ClientEnvelope::text(self.config.continuation_prompt.clone()))
                .await?;
            Ok(())
        }
        .await;

        source.stop().await;
        feed_cancel.cancel();
        let _ = feeder.await;

        if result.is_ok() {
            self.controller
                .publish_upload_state(UploadState::Done, attempt);
        }
        result
    }
}
