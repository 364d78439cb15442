//! Voice session orchestration
//!
//! This module provides the `SessionOrchestrator` that manages:
//! - Backend selection and one-shot failover (primary -> fallback)
//! - Connect / speak / stop / disconnect / microphone permission
//! - Forwarding of backend streams into reactive state (`SubscriptionHub`)
//! - A bounded debug log of orchestration decisions

mod config;
mod debug;
mod hub;
mod orchestrator;
mod state;

pub use config::{OrchestratorConfig, DEFAULT_VOICE};
pub use debug::{DebugEntry, DebugRingBuffer, DEFAULT_DEBUG_CAPACITY};
pub use hub::{Subscription, SubscriptionHub};
pub use orchestrator::{generate_room_name, SessionOrchestrator};
pub use state::{ConnectionState, Session, VoiceState, VoiceStateView};
