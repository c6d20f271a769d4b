//! Live channel abstraction
//!
//! The session controller talks to the model endpoint through these
//! traits only. Production supplies a network-backed connector; tests
//! and offline runs supply in-process ones.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::LiveConfig;
use crate::error::Result;
use crate::live::wire::{ClientEnvelope, ServerEnvelope};

/// Inbound events buffered per channel
pub const CHANNEL_EVENT_CAPACITY: usize = 256;

/// Lifecycle and traffic events emitted by an open channel.
///
/// `Open` arrives exactly once when the channel is ready for traffic.
/// After `Error` or `Closed` the channel sends nothing further.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Channel is ready for traffic
    Open,
    /// One decoded message from the endpoint
    Message(ServerEnvelope),
    /// The channel failed; the text describes the failure
    Error(String),
    /// The channel ended, locally or remotely
    Closed,
}

/// Receiving half of a channel's event stream
pub type ChannelEvents = mpsc::Receiver<ChannelEvent>;

/// An open bidirectional link to the model endpoint.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// Send one envelope. Fails if the channel is no longer open.
    async fn send(&self, envelope: ClientEnvelope) -> Result<()>;

    /// Close the channel. Safe to call more than once; the event stream
    /// ends with `Closed`.
    async fn close(&self) -> Result<()>;
}

/// Factory for live channels.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Establish a channel for the configured model.
    ///
    /// On success the returned event stream will deliver `Open` once the
    /// channel is ready, then messages until `Error` or `Closed`.
    async fn connect(&self, config: &LiveConfig) -> Result<(Arc<dyn LiveChannel>, ChannelEvents)>;
}
