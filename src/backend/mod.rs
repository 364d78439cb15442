//! Voice backend contract and implementations
//!
//! The session layer talks to backends only through [`VoiceBackend`]; which
//! concrete implementation sits behind the primary and fallback slots is a
//! configuration decision made by [`BackendFactory`].

mod capability;
mod loopback;

pub use capability::{
    BackendErrorEvent, BackendErrorKind, BackendEvent, BackendFactory, BackendKind,
    BackendSettings, MicPermission, SynthesisState, VoiceBackend,
};
pub use loopback::{LoopbackBackend, LoopbackConfig};
