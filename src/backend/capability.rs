use super::loopback::{LoopbackBackend, LoopbackConfig};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Which of the two interchangeable backends a value refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Preferred real-time voice service
    Primary,
    /// Degraded service used when the primary is unavailable or errors
    Fallback,
}

impl BackendKind {
    /// Human-facing service label used in debug lines
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Primary => "standard",
            BackendKind::Fallback => "fallback",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Primary => f.write_str("primary"),
            BackendKind::Fallback => f.write_str("fallback"),
        }
    }
}

/// Speech synthesis progress reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisState {
    #[default]
    Idle,
    Synthesizing,
    Speaking,
    Error,
}

/// Microphone permission as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicPermission {
    #[default]
    Unknown,
    Granted,
    Denied,
}

impl fmt::Display for MicPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MicPermission::Unknown => f.write_str("unknown"),
            MicPermission::Granted => f.write_str("granted"),
            MicPermission::Denied => f.write_str("denied"),
        }
    }
}

/// Free-form backend notification (room joined, track published, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendEvent {
    /// Event type, e.g. "connected"
    pub kind: String,
    /// Event-specific payload
    pub payload: serde_json::Value,
}

impl BackendEvent {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Category of an asynchronously reported backend error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendErrorKind {
    Permission,
    Connection,
    Synthesis,
}

/// Error pushed by a backend outside of any particular call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendErrorEvent {
    pub kind: BackendErrorKind,
    pub message: String,
}

/// Real-time voice backend trait
///
/// Two implementations are wired at any time (primary and fallback). Every
/// operation may fail with a backend-specific error; callers treat all
/// failures uniformly. The five stream accessors hand out fresh receivers:
/// state streams (`watch`) always carry a current value, notification
/// streams (`broadcast`) only carry what is sent after subscribing.
#[async_trait::async_trait]
pub trait VoiceBackend: Send + Sync {
    /// Join `room_name` using `token`
    ///
    /// When `require_microphone` is false the backend must not prompt for
    /// microphone access.
    async fn connect(&self, room_name: &str, token: &str, require_microphone: bool) -> Result<()>;

    /// Synthesize and play `text` with `voice`
    async fn speak(&self, text: &str, voice: &str) -> Result<()>;

    /// Interrupt current speech
    async fn stop(&self) -> Result<()>;

    /// Leave the room and release media resources
    async fn disconnect(&self) -> Result<()>;

    /// Prompt for microphone access; `Ok(false)` means the user denied it
    async fn request_microphone_permission(&self) -> Result<bool>;

    fn speaking_state(&self) -> watch::Receiver<bool>;

    fn synthesis_state(&self) -> watch::Receiver<SynthesisState>;

    fn mic_permission(&self) -> watch::Receiver<MicPermission>;

    fn events(&self) -> broadcast::Receiver<BackendEvent>;

    fn errors(&self) -> broadcast::Receiver<BackendErrorEvent>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Backend selection as it appears in configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendSettings {
    /// In-process backend (device demo mode and tests)
    Loopback(LoopbackConfig),
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings::Loopback(LoopbackConfig::default())
    }
}

/// Voice backend factory
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend from its configured settings
    pub fn create(name: &str, settings: &BackendSettings) -> Result<Arc<dyn VoiceBackend>> {
        match settings {
            BackendSettings::Loopback(config) => {
                let backend = LoopbackBackend::new(name, config.clone());
                Ok(Arc::new(backend))
            }
        }
    }
}
