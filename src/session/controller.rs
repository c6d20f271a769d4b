//! Session controller
//!
//! Owns the connection lifecycle and the two per-session tasks: one
//! forwarding microphone frames outward, one dispatching inbound channel
//! events. All teardown funnels through a single ordered path so a
//! session can be dropped at any point of its setup, repeatedly, without
//! errors escaping.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::analyser::SpectrumTap;
use crate::audio::capture::{AudioFrame, BoxedCaptureSource};
use crate::audio::clip::{self, UploadClip};
use crate::audio::pcm;
use crate::audio::playback::PlaybackScheduler;
use crate::audio::AudioSystem;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::live::channel::{ChannelEvent, ChannelEvents, LiveChannel, LiveConnector};
use crate::live::wire::{ClientEnvelope, ServerEnvelope};
use crate::session::upload::{UploadJob, UploadState};
use crate::session::ConnectionState;

/// Session controller
///
/// One instance serves the whole application lifetime; individual
/// sessions come and go underneath it via [`connect`](Self::connect) and
/// [`disconnect`](Self::disconnect).
pub struct SessionController {
    config: AppConfig,
    connector: Arc<dyn LiveConnector>,
    audio: Arc<dyn AudioSystem>,
    events: EventBus,
    input_tap: Arc<SpectrumTap>,
    output_tap: Arc<SpectrumTap>,
    state: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    /// Current session number; tasks carrying an older number are stale
    generation: Arc<AtomicU64>,
    /// While set, mic frames are dropped before encoding
    upload_muted: Arc<AtomicBool>,
    active: Mutex<Option<ActiveSession>>,
    /// Serializes connect/disconnect so teardowns never interleave
    lifecycle: Mutex<()>,
}

/// Resources of one live session
struct ActiveSession {
    generation: u64,
    channel: Arc<dyn LiveChannel>,
    scheduler: Arc<PlaybackScheduler>,
    mic: Option<BoxedCaptureSource>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(
        config: AppConfig,
        connector: Arc<dyn LiveConnector>,
        audio: Arc<dyn AudioSystem>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            connector,
            audio,
            events: EventBus::new(),
            input_tap: Arc::new(SpectrumTap::new()),
            output_tap: Arc::new(SpectrumTap::new()),
            state: state_tx,
            state_rx,
            generation: Arc::new(AtomicU64::new(0)),
            upload_muted: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// The session event bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Visualization tap fed by the outbound (capture) path
    pub fn input_tap(&self) -> Arc<SpectrumTap> {
        self.input_tap.clone()
    }

    /// Visualization tap fed by the inbound (playback) path
    pub fn output_tap(&self) -> Arc<SpectrumTap> {
        self.output_tap.clone()
    }

    /// Whether mic frames are currently being dropped for an upload
    pub fn is_muted(&self) -> bool {
        self.upload_muted.load(Ordering::Acquire)
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        self.upload_muted.store(muted, Ordering::Release);
    }

    pub(crate) fn publish_upload_state(&self, state: UploadState, attempt: u32) {
        debug!(state = state.name_str(), attempt, "upload state");
        self.events
            .publish(SessionEvent::UploadStateChanged { state, attempt });
    }

    /// Channel of the current session, if one is live
    pub(crate) async fn current_channel(&self) -> Option<Arc<dyn LiveChannel>> {
        self.active.lock().await.as_ref().map(|s| s.channel.clone())
    }

    fn set_state(&self, next: ConnectionState) {
        publish_state(&self.state, &self.events, next);
    }

    /// Establish a fresh session, tearing down any prior one first.
    ///
    /// A failed channel open is fatal and leaves the state at `Error`.
    /// A missing or denied microphone is not: the session comes up in
    /// file-upload-only mode.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, model = %self.config.live.model, "connecting");
        self.set_state(ConnectionState::Connecting);

        let (channel, channel_events) = match self.connector.connect(&self.config.live).await {
            Ok(pair) => pair,
            Err(e) => {
                error!("channel open failed: {e}");
                self.set_state(ConnectionState::Error);
                self.events.publish(SessionEvent::Error {
                    message: e.to_string(),
                });
                return Err(match e {
                    AppError::ConnectError(_) => e,
                    other => AppError::ConnectError(other.to_string()),
                });
            }
        };

        let sink = match self.audio.open_sink() {
            Ok(sink) => sink,
            Err(e) => {
                let _ = channel.close().await;
                error!("audio output open failed: {e}");
                self.set_state(ConnectionState::Error);
                self.events.publish(SessionEvent::Error {
                    message: e.to_string(),
                });
                return Err(AppError::ConnectError(e.to_string()));
            }
        };
        let scheduler = Arc::new(PlaybackScheduler::new(sink, self.output_tap.clone()));

        // Best-effort: a session without a microphone still plays model
        // audio and accepts file uploads
        let mut mic = self.audio.open_capture(self.input_tap.clone());
        let mic_frames = match mic.start().await {
            Ok(frames) => Some(frames),
            Err(e) => {
                warn!("microphone unavailable, continuing without live input: {e}");
                None
            }
        };
        let mic = mic_frames.is_some().then_some(mic);

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        if let Some(frames) = mic_frames {
            tasks.push(tokio::spawn(forward_task(
                frames,
                channel.clone(),
                self.upload_muted.clone(),
                self.generation.clone(),
                generation,
                cancel.clone(),
            )));
        }

        tasks.push(tokio::spawn(dispatch_task(
            channel_events,
            scheduler.clone(),
            self.events.clone(),
            self.state.clone(),
            self.generation.clone(),
            generation,
            self.config.audio.output_sample_rate,
            cancel.clone(),
        )));

        *self.active.lock().await = Some(ActiveSession {
            generation,
            channel,
            scheduler,
            mic,
            cancel,
            tasks,
        });

        info!(generation, "session ready");
        Ok(())
    }

    /// Tear down the current session, if any. Never errors outward and
    /// is safe to call repeatedly.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;
    }

    /// Ordered teardown: mute flag, channel, capture, playback handles,
    /// internal fields, then the state notification.
    async fn teardown(&self) {
        let session = self.active.lock().await.take();
        let Some(session) = session else {
            self.set_state(ConnectionState::Disconnected);
            return;
        };
        let ActiveSession {
            generation,
            channel,
            scheduler,
            mic,
            cancel,
            tasks,
        } = session;

        info!(generation, "tearing down session");
        self.upload_muted.store(false, Ordering::Release);

        cancel.cancel();
        if let Err(e) = channel.close().await {
            debug!("channel close during teardown: {e}");
        }

        if let Some(mut mic) = mic {
            mic.stop().await;
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!("session task join: {e}");
            }
        }

        // Playback handles are released after the tasks that used them
        drop(scheduler);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Decode an audio file and upload it as a continuation request.
    ///
    /// Decode failures are terminal: they propagate without touching the
    /// mute flag or consuming the retry budget.
    pub async fn upload_clip(&self, path: &Path) -> Result<()> {
        self.publish_upload_state(UploadState::Decoding, 1);
        let target_rate = self.config.audio.input_sample_rate;
        let ceiling = self.config.audio.peak_ceiling;
        let path = path.to_path_buf();

        let clip =
            tokio::task::spawn_blocking(move || clip::load_clip_file(&path, target_rate, ceiling))
                .await
                .map_err(|e| AppError::Internal(format!("decode task join: {e}")))??;

        self.upload_decoded(clip).await
    }

    /// Decode an in-memory audio buffer and upload it.
    pub async fn upload_bytes(
        &self,
        data: Bytes,
        extension: Option<&str>,
        name: &str,
    ) -> Result<()> {
        self.publish_upload_state(UploadState::Decoding, 1);
        let target_rate = self.config.audio.input_sample_rate;
        let ceiling = self.config.audio.peak_ceiling;
        let extension = extension.map(str::to_string);
        let name = name.to_string();

        let clip = tokio::task::spawn_blocking(move || {
            clip::load_clip_bytes(data, extension.as_deref(), &name, target_rate, ceiling)
        })
        .await
        .map_err(|e| AppError::Internal(format!("decode task join: {e}")))??;

        self.upload_decoded(clip).await
    }

    /// Upload an already-decoded clip.
    pub async fn upload_decoded(&self, clip: UploadClip) -> Result<()> {
        info!(
            name = %clip.name,
            duration_secs = clip.duration_secs(),
            "uploading clip"
        );
        UploadJob::new(self, self.config.upload.clone())
            .run(clip)
            .await
    }
}

/// Move the state machine and publish the change, once per transition.
fn publish_state(
    state: &watch::Sender<ConnectionState>,
    events: &EventBus,
    next: ConnectionState,
) {
    let changed = state.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
    if changed {
        debug!(state = next.name_str(), "session state changed");
        events.publish(SessionEvent::StateChanged { state: next });
    }
}

/// Forward mic frames to the channel in capture order.
///
/// Frames are dropped while the mute flag is set, before any encoding.
/// Per-frame send failures are logged and swallowed; the session stays
/// up.
async fn forward_task(
    mut frames: mpsc::Receiver<AudioFrame>,
    channel: Arc<dyn LiveChannel>,
    muted: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(f) => f,
                None => break,
            },
        };

        // A frame from session N must never ride session N+1's channel
        if generation.load(Ordering::SeqCst) != my_generation {
            break;
        }
        if muted.load(Ordering::Acquire) {
            continue;
        }

        let payload = pcm::encode_envelope(&frame.samples);
        if let Err(e) = channel.send(ClientEnvelope::media(payload)).await {
            debug!(sequence = frame.sequence, "mic frame send failed: {e}");
        }
    }
    debug!("forward task ended");
}

/// Dispatch inbound channel events until the channel or session ends.
async fn dispatch_task(
    mut channel_events: ChannelEvents,
    scheduler: Arc<PlaybackScheduler>,
    events: EventBus,
    state: watch::Sender<ConnectionState>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
    output_rate: u32,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = channel_events.recv() => match event {
                Some(e) => e,
                None => break,
            },
        };

        if generation.load(Ordering::SeqCst) != my_generation {
            break;
        }

        match event {
            ChannelEvent::Open => {
                publish_state(&state, &events, ConnectionState::Connected);
            }
            ChannelEvent::Message(message) => {
                dispatch_message(&message, &scheduler, &events, output_rate);
            }
            ChannelEvent::Error(text) => {
                error!("live channel failed: {text}");
                publish_state(&state, &events, ConnectionState::Error);
                events.publish(SessionEvent::Error { message: text });
                cancel.cancel();
                break;
            }
            ChannelEvent::Closed => {
                info!("live channel closed by remote");
                publish_state(&state, &events, ConnectionState::Disconnected);
                cancel.cancel();
                break;
            }
        }
    }
    debug!("dispatch task ended");
}

/// Route one server message: interruption first, then parts, then the
/// turn boundary. Failures become logs or events, never panics.
fn dispatch_message(
    message: &ServerEnvelope,
    scheduler: &PlaybackScheduler,
    events: &EventBus,
    output_rate: u32,
) {
    if message.interrupted() {
        debug!("model interrupted, resetting playback");
        scheduler.reset();
    }

    for part in message.parts() {
        if let Some(text) = &part.text {
            events.publish(SessionEvent::TextReceived { text: text.clone() });
        }
        if let Some(inline) = &part.inline_data {
            match pcm::decode_envelope(&inline.data) {
                Ok(samples) if !samples.is_empty() => {
                    if let Err(e) = scheduler.enqueue(Arc::new(samples), output_rate) {
                        warn!("failed to schedule model audio: {e}");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("unplayable audio payload: {e}"),
            }
        }
    }

    if message.turn_complete() {
        debug!("model turn complete");
        events.publish(SessionEvent::TurnComplete);
    }
}
