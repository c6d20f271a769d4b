//! Session event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::session::upload::UploadState;
use crate::session::ConnectionState;

/// Session event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "state": "connected" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    /// Connection state changed
    #[serde(rename = "session.state_changed")]
    StateChanged {
        /// Current connection state
        state: ConnectionState,
    },

    /// Session-level error (channel failure, dispatch failure)
    #[serde(rename = "session.error")]
    Error {
        /// Error message
        message: String,
    },

    /// Text part received from the model
    #[serde(rename = "session.text")]
    TextReceived {
        /// Text content
        text: String,
    },

    /// Model signalled the end of its turn
    #[serde(rename = "session.turn_complete")]
    TurnComplete,

    /// Upload job state changed
    #[serde(rename = "upload.state_changed")]
    UploadStateChanged {
        /// Current upload phase
        state: UploadState,
        /// Attempt number (1-based; 2 means the retry is running)
        attempt: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization() {
        let event = SessionEvent::StateChanged {
            state: ConnectionState::Connecting,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("session.state_changed"));
        assert!(json.contains("connecting"));

        let deserialized: SessionEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(deserialized, SessionEvent::StateChanged { .. }));
    }

    #[test]
    fn test_event_tags_are_dotted_names() {
        let cases = [
            (
                serde_json::to_value(SessionEvent::Error {
                    message: "channel closed".to_string(),
                })
                .unwrap(),
                "session.error",
            ),
            (
                serde_json::to_value(SessionEvent::TurnComplete).unwrap(),
                "session.turn_complete",
            ),
            (
                serde_json::to_value(SessionEvent::UploadStateChanged {
                    state: UploadState::Streaming,
                    attempt: 1,
                })
                .unwrap(),
                "upload.state_changed",
            ),
        ];

        for (value, tag) in cases {
            assert_eq!(value["event"], tag);
        }
    }
}
