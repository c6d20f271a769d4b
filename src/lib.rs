//! Continuo - Realtime musical continuation sessions
//!
//! This crate provides the core functionality for Continuo: live
//! microphone streaming to a realtime music model, gapless playback of
//! the model's audio, and paced upload of recorded clips for
//! continuation.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod live;
pub mod session;

pub use error::{AppError, Result};
