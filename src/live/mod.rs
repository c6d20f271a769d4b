//! Live endpoint module
//!
//! This module provides:
//! - Wire shapes for the realtime model protocol
//! - Channel and connector seams used by the session controller
//! - An in-process loopback endpoint for offline runs

pub mod channel;
pub mod loopback;
pub mod wire;

pub use channel::{ChannelEvent, ChannelEvents, LiveChannel, LiveConnector};
pub use loopback::LoopbackConnector;
pub use wire::{ClientEnvelope, ServerEnvelope};
