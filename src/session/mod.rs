//! Session module
//!
//! This module provides:
//! - The connection state machine
//! - The session controller (lifecycle, inbound dispatch, mic forwarding)
//! - The upload job with its retry policy

use serde::{Deserialize, Serialize};

pub mod controller;
pub mod upload;

pub use controller::SessionController;
pub use upload::{RetryPolicy, UploadState};

/// Connection lifecycle state, broadcast over a watch channel.
///
/// Legal transitions: `Disconnected -> Connecting -> {Connected | Error}`,
/// `Connected -> {Disconnected | Error}`, `Error -> {Connecting |
/// Disconnected}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session; the idle state
    #[default]
    Disconnected,
    /// Channel open in progress
    Connecting,
    /// Channel is open and traffic flows
    Connected,
    /// The session failed; a new connect or a disconnect leaves this state
    Error,
}

impl ConnectionState {
    pub fn name_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}
