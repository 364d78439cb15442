use super::debug::DebugRingBuffer;
use crate::backend::{BackendKind, MicPermission, SynthesisState};
use crate::error::VoiceError;
use serde::Serialize;

/// Lifecycle of the voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Last operation failed on both backends; only `connect` recovers
    Failing,
}

/// The orchestrator's view of the live conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Room identifier, empty when disconnected
    pub room_name: String,
    pub connection_state: ConnectionState,
    pub active_backend: BackendKind,
    pub mic_permission: MicPermission,
    pub synthesis_state: SynthesisState,
}

/// Reactive state owned by the orchestrator
///
/// Published through a `tokio::sync::watch` channel; observers only ever see
/// whole snapshots.
#[derive(Debug, Clone)]
pub struct VoiceState {
    pub is_speaking: bool,
    pub synthesis_state: SynthesisState,
    pub connection_state: ConnectionState,
    pub room_name: String,
    pub mic_permission: MicPermission,
    pub active_backend: BackendKind,
    pub is_constrained_device: bool,
    pub error: Option<VoiceError>,
    pub debug: DebugRingBuffer,

    /// Backend the live connection was made on
    pub(crate) connected_backend: Option<BackendKind>,
}

impl VoiceState {
    pub(crate) fn new(
        active_backend: BackendKind,
        is_constrained_device: bool,
        debug_capacity: usize,
    ) -> Self {
        Self {
            is_speaking: false,
            synthesis_state: SynthesisState::Idle,
            connection_state: ConnectionState::Disconnected,
            room_name: String::new(),
            mic_permission: MicPermission::Unknown,
            active_backend,
            is_constrained_device,
            error: None,
            debug: DebugRingBuffer::new(debug_capacity),
            connected_backend: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// Connected, and on the backend that is currently active
    pub fn is_connected_on(&self, backend: BackendKind) -> bool {
        self.is_connected() && self.connected_backend == Some(backend)
    }

    pub fn is_using_fallback(&self) -> bool {
        self.active_backend == BackendKind::Fallback
    }

    pub fn session(&self) -> Session {
        Session {
            room_name: self.room_name.clone(),
            connection_state: self.connection_state,
            active_backend: self.active_backend,
            mic_permission: self.mic_permission,
            synthesis_state: self.synthesis_state,
        }
    }

    /// Serializable surface consumed by the UI
    pub fn view(&self) -> VoiceStateView {
        VoiceStateView {
            is_speaking: self.is_speaking,
            synthesis_state: self.synthesis_state,
            is_connected: self.is_connected(),
            connection_state: self.connection_state,
            room_name: self.room_name.clone(),
            mic_permission: self.mic_permission,
            debug_info: self.debug.lines(),
            error: self.error.clone(),
            is_using_fallback: self.is_using_fallback(),
            active_backend: self.active_backend,
            is_constrained_device: self.is_constrained_device,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceStateView {
    pub is_speaking: bool,
    pub synthesis_state: SynthesisState,
    pub is_connected: bool,
    pub connection_state: ConnectionState,
    pub room_name: String,
    pub mic_permission: MicPermission,
    pub debug_info: Vec<String>,
    pub error: Option<VoiceError>,
    pub is_using_fallback: bool,
    pub active_backend: BackendKind,
    pub is_constrained_device: bool,
}

/// Assign `value` to `slot`, reporting whether anything changed
pub(crate) fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
