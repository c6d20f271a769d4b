//! Live channel wire shapes
//!
//! JSON envelopes exchanged with the realtime model endpoint. Field
//! names follow the endpoint's camelCase protocol; optional fields are
//! skipped when absent so outbound messages stay minimal.

use serde::{Deserialize, Serialize};

/// MIME type attached to model audio payloads
pub const AUDIO_MIME_TYPE: &str = "audio/pcm;rate=24000";

/// Outbound message: one audio payload or one text part
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Base64-encoded 16-bit little-endian PCM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
}

impl ClientEnvelope {
    /// Envelope carrying an encoded audio payload
    pub fn media(payload: String) -> Self {
        Self {
            media: Some(payload),
            content: None,
        }
    }

    /// Envelope carrying a single text part
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            media: None,
            content: Some(Content {
                parts: vec![Part {
                    text: Some(text.into()),
                    inline_data: None,
                }],
            }),
        }
    }
}

/// Ordered parts forming one message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One part of a turn: text, audio, or both absent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

/// Base64 audio payload with its MIME type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub data: String,
}

/// Inbound message from the model endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

impl ServerEnvelope {
    /// Whether this message carries the interruption signal
    pub fn interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.interrupted)
            .unwrap_or(false)
    }

    /// Whether this message closes the model's turn
    pub fn turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.turn_complete)
            .unwrap_or(false)
    }

    /// Parts of the model turn carried by this message
    pub fn parts(&self) -> &[Part] {
        self.server_content
            .as_ref()
            .and_then(|c| c.model_turn.as_ref())
            .map(|t| t.parts.as_slice())
            .unwrap_or(&[])
    }
}

/// Model output increment with turn-boundary flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    /// Playback of everything pending should be abandoned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    /// No further parts will arrive for this turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
}

/// Parts generated by the model so far in this turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}
