//! Application configuration
//!
//! All sections deserialize with `#[serde(default)]` so a partial config
//! file only overrides the fields it names. Defaults carry the protocol
//! constants the rest of the crate relies on.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Text prompt sent after an upload finishes streaming.
pub const DEFAULT_CONTINUATION_PROMPT: &str =
    "I have finished playing. Generate a musical continuation now.";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Audio capture and playback settings
    pub audio: AudioConfig,
    /// File upload settings
    pub upload: UploadConfig,
    /// Live session settings
    pub live: LiveConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            upload: UploadConfig::default(),
            live: LiveConfig::default(),
        }
    }
}

/// Audio capture and playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name (None = system default)
    pub input_device: Option<String>,
    /// Output device name (None = system default)
    pub output_device: Option<String>,
    /// Sample rate of audio sent to the service
    pub input_sample_rate: u32,
    /// Sample rate of audio received from the service
    pub output_sample_rate: u32,
    /// Microphone frame size in samples at the device's native rate
    pub mic_frame_samples: usize,
    /// Peak normalization ceiling for uploaded clips
    pub peak_ceiling: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            mic_frame_samples: 4096,
            peak_ceiling: 0.95,
        }
    }
}

/// File upload configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Upload chunk size in samples at the input rate (~0.512 s at 16 kHz)
    pub chunk_samples: usize,
    /// Delay between consecutive chunks in milliseconds
    pub pace_ms: u64,
    /// Reconnect-and-restream attempts after a transient failure
    pub max_retries: u32,
    /// Prompt sent once streaming completes
    pub continuation_prompt: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_samples: 8192,
            pace_ms: 50,
            max_retries: 1,
            continuation_prompt: DEFAULT_CONTINUATION_PROMPT.to_string(),
        }
    }
}

impl UploadConfig {
    /// Inter-chunk pacing as a [`std::time::Duration`]
    pub fn pace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.pace_ms)
    }
}

/// Live session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    /// Model identifier requested at connect time
    pub model: String,
    /// Optional system instruction for the session
    pub system_instruction: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: "models/lyria-realtime".to_string(),
            system_instruction: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Load from an optional path, falling back to defaults when absent.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_carry_protocol_constants() {
        let config = AppConfig::default();
        assert_eq!(config.audio.input_sample_rate, 16_000);
        assert_eq!(config.audio.output_sample_rate, 24_000);
        assert_eq!(config.audio.mic_frame_samples, 4096);
        assert_eq!(config.upload.chunk_samples, 8192);
        assert_eq!(config.upload.pace_ms, 50);
        assert_eq!(config.upload.max_retries, 1);
        assert!((config.audio.peak_ceiling - 0.95).abs() < f32::EPSILON);
        assert_eq!(config.upload.continuation_prompt, DEFAULT_CONTINUATION_PROMPT);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{ "upload": { "pace_ms": 100 } }"#).unwrap();
        assert_eq!(parsed.upload.pace_ms, 100);
        assert_eq!(parsed.upload.chunk_samples, 8192);
        assert_eq!(parsed.audio.input_sample_rate, 16_000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "live": {{ "model": "models/test" }} }}"#).unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.live.model, "models/test");
        assert_eq!(config.upload.max_retries, 1);
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(AppConfig::load(file.path()).is_err());
    }
}
