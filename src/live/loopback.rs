//! In-process loopback endpoint
//!
//! A [`LiveConnector`] that needs no network: audio payloads accumulate
//! inside the channel, and a text prompt triggers a model turn that
//! echoes the accumulated audio back at the playback rate. Used by the
//! binary for offline runs and by end-to-end tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::pcm::{self, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::config::LiveConfig;
use crate::error::{AppError, Result};
use crate::live::channel::{
    ChannelEvent, ChannelEvents, LiveChannel, LiveConnector, CHANNEL_EVENT_CAPACITY,
};
use crate::live::wire::{
    ClientEnvelope, InlineData, ModelTurn, Part, ServerContent, ServerEnvelope, AUDIO_MIME_TYPE,
};

/// Samples per echoed audio part, half a second at the playback rate
const REPLY_CHUNK_SAMPLES: usize = 12_000;

/// Connector that wires sessions to an in-process echo endpoint.
pub struct LoopbackConnector;

#[async_trait]
impl LiveConnector for LoopbackConnector {
    async fn connect(&self, config: &LiveConfig) -> Result<(Arc<dyn LiveChannel>, ChannelEvents)> {
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_EVENT_CAPACITY);

        event_tx
            .send(ChannelEvent::Open)
            .await
            .map_err(|_| AppError::ConnectError("loopback event stream closed".to_string()))?;
        info!(model = %config.model, "loopback channel open");

        let channel = Arc::new(LoopbackChannel {
            events: event_tx,
            pending: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        Ok((channel, event_rx))
    }
}

/// Channel half of the loopback endpoint.
///
/// Media envelopes are decoded and buffered; a text envelope consumes
/// the buffer and emits the full reply turn before `send` returns, so
/// event order is deterministic.
struct LoopbackChannel {
    events: mpsc::Sender<ChannelEvent>,
    pending: Mutex<Vec<f32>>,
    closed: AtomicBool,
}

impl LoopbackChannel {
    async fn emit(&self, content: ServerContent) -> Result<()> {
        let message = ServerEnvelope {
            server_content: Some(content),
        };
        self.events
            .send(ChannelEvent::Message(message))
            .await
            .map_err(|_| AppError::StreamError("loopback event stream closed".to_string()))
    }

    /// Echo the accumulated audio back as one model turn.
    async fn reply(&self, samples: Vec<f32>) -> Result<()> {
        let echoed = match pcm::resample(&samples, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE) {
            Ok(s) => s,
            Err(e) => {
                warn!("loopback resample failed: {e}");
                Vec::new()
            }
        };
        debug!(
            received = samples.len(),
            echoed = echoed.len(),
            "loopback generating reply turn"
        );

        self.emit(ServerContent {
            model_turn: Some(ModelTurn {
                parts: vec![Part {
                    text: Some("Continuing from your performance.".to_string()),
                    inline_data: None,
                }],
            }),
            ..Default::default()
        })
        .await?;

        for chunk in echoed.chunks(REPLY_CHUNK_SAMPLES) {
            self.emit(ServerContent {
                model_turn: Some(ModelTurn {
                    parts: vec![Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: Some(AUDIO_MIME_TYPE.to_string()),
                            data: pcm::encode_envelope(chunk),
                        }),
                    }],
                }),
                ..Default::default()
            })
            .await?;
        }

        self.emit(ServerContent {
            turn_complete: Some(true),
            ..Default::default()
        })
        .await
    }
}

#[async_trait]
impl LiveChannel for LoopbackChannel {
    async fn send(&self, envelope: ClientEnvelope) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::StreamError("channel closed".to_string()));
        }

        if let Some(payload) = envelope.media {
            let samples = pcm::decode_envelope(&payload)
                .map_err(|e| AppError::StreamError(format!("bad media payload: {e}")))?;
            self.pending.lock().extend_from_slice(&samples);
            return Ok(());
        }

        if let Some(content) = envelope.content {
            let has_text = content.parts.iter().any(|p| p.text.is_some());
            if has_text {
                let accumulated = std::mem::take(&mut *self.pending.lock());
                return self.reply(accumulated).await;
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Receiver may already be gone during teardown
        let _ = self.events.send(ChannelEvent::Closed).await;
        debug!("loopback channel closed");
        Ok(())
    }
}
