//! Error types for the voice session layer and the chat store

use crate::backend::BackendKind;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for voice and storage operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Closed set of failures surfaced to callers and to UI-visible state.
///
/// Serializes as `{"type": "<kind>", ...fields}` so the UI can branch on the
/// kind without matching on message text.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceError {
    /// Microphone denied, unsupported, or the permission prompt failed
    #[error("microphone permission error on {backend} backend: {message}")]
    Permission { backend: BackendKind, message: String },

    /// Token issuance or backend connect failure
    #[error("connection to room '{room}' failed on {backend} backend: {message}")]
    Connection {
        backend: BackendKind,
        room: String,
        message: String,
    },

    /// Speak or stop failure
    #[error("speech synthesis failed on {backend} backend: {message}")]
    Synthesis { backend: BackendKind, message: String },

    /// Malformed record rejected before any I/O
    #[error("invalid {record}: {field} {reason}")]
    StorageValidation {
        record: &'static str,
        field: &'static str,
        reason: &'static str,
    },

    /// Underlying store failure
    #[error("storage {operation} failed: {message}")]
    StorageIo {
        operation: &'static str,
        message: String,
    },
}

impl VoiceError {
    pub(crate) fn connection(backend: BackendKind, room: &str, err: &anyhow::Error) -> Self {
        VoiceError::Connection {
            backend,
            room: room.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub(crate) fn synthesis(backend: BackendKind, err: &anyhow::Error) -> Self {
        VoiceError::Synthesis {
            backend,
            message: format!("{err:#}"),
        }
    }

    pub(crate) fn permission(backend: BackendKind, err: &anyhow::Error) -> Self {
        VoiceError::Permission {
            backend,
            message: format!("{err:#}"),
        }
    }

    pub(crate) fn storage_io(operation: &'static str, err: &anyhow::Error) -> Self {
        VoiceError::StorageIo {
            operation,
            message: format!("{err:#}"),
        }
    }

    /// Short machine-readable kind, matching the serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            VoiceError::Permission { .. } => "permission",
            VoiceError::Connection { .. } => "connection",
            VoiceError::Synthesis { .. } => "synthesis",
            VoiceError::StorageValidation { .. } => "storage_validation",
            VoiceError::StorageIo { .. } => "storage_io",
        }
    }
}
