use super::capability::{
    BackendErrorEvent, BackendErrorKind, BackendEvent, MicPermission, SynthesisState, VoiceBackend,
};
use anyhow::{bail, Result};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Capacity of the notification channels
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Configuration for the loopback backend
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct LoopbackConfig {
    /// Simulated network latency of `connect`
    #[serde(default)]
    pub connect_latency_ms: u64,

    /// How long a `speak` call keeps the speaking flag raised
    #[serde(default)]
    pub speech_duration_ms: u64,

    /// Answer every microphone prompt with "denied"
    #[serde(default)]
    pub deny_microphone: bool,
}

/// In-process voice backend
///
/// Plays nothing; it drives its five streams the same way a networked
/// backend does and records every call. Failures can be scripted at runtime,
/// which is how the demo binary and the tests exercise failover.
pub struct LoopbackBackend {
    name: String,
    connect_latency: Duration,
    speech_duration: Duration,

    connected_room: Mutex<Option<String>>,
    spoken: Mutex<Vec<(String, String)>>,

    speaking_tx: watch::Sender<bool>,
    synthesis_tx: watch::Sender<SynthesisState>,
    permission_tx: watch::Sender<MicPermission>,
    events_tx: broadcast::Sender<BackendEvent>,
    errors_tx: broadcast::Sender<BackendErrorEvent>,

    fail_connect: AtomicBool,
    fail_speak: AtomicBool,
    fail_permission: AtomicBool,
    deny_microphone: AtomicBool,
    stall: AtomicBool,

    connect_calls: AtomicUsize,
    speak_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    permission_calls: AtomicUsize,
}

impl LoopbackBackend {
    pub fn new(name: impl Into<String>, config: LoopbackConfig) -> Self {
        let (speaking_tx, _) = watch::channel(false);
        let (synthesis_tx, _) = watch::channel(SynthesisState::Idle);
        let (permission_tx, _) = watch::channel(MicPermission::Unknown);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (errors_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            name: name.into(),
            connect_latency: Duration::from_millis(config.connect_latency_ms),
            speech_duration: Duration::from_millis(config.speech_duration_ms),
            connected_room: Mutex::new(None),
            spoken: Mutex::new(Vec::new()),
            speaking_tx,
            synthesis_tx,
            permission_tx,
            events_tx,
            errors_tx,
            fail_connect: AtomicBool::new(false),
            fail_speak: AtomicBool::new(false),
            fail_permission: AtomicBool::new(false),
            deny_microphone: AtomicBool::new(config.deny_microphone),
            stall: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            speak_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            permission_calls: AtomicUsize::new(0),
        }
    }

    /// Make every `connect` fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make every `speak` fail
    pub fn set_fail_speak(&self, fail: bool) {
        self.fail_speak.store(fail, Ordering::SeqCst);
    }

    /// Make every microphone prompt fail with an error
    pub fn set_fail_permission(&self, fail: bool) {
        self.fail_permission.store(fail, Ordering::SeqCst);
    }

    /// Answer microphone prompts with "denied"
    pub fn set_deny_microphone(&self, deny: bool) {
        self.deny_microphone.store(deny, Ordering::SeqCst);
    }

    /// Never resolve `connect`, `speak` or microphone prompts
    pub fn set_stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Push a generic event to subscribers
    pub fn emit_event(&self, kind: &str, payload: serde_json::Value) {
        let _ = self.events_tx.send(BackendEvent::new(kind, payload));
    }

    /// Push an out-of-band error to subscribers
    pub fn emit_error(&self, kind: BackendErrorKind, message: impl Into<String>) {
        let _ = self.errors_tx.send(BackendErrorEvent {
            kind,
            message: message.into(),
        });
    }

    /// Report a microphone permission change, as a device prompt would
    pub fn set_mic_permission(&self, permission: MicPermission) {
        self.permission_tx.send_replace(permission);
    }

    /// Report a speaking-state change
    pub fn set_speaking(&self, speaking: bool) {
        self.speaking_tx.send_replace(speaking);
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn speak_attempts(&self) -> usize {
        self.speak_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_calls.load(Ordering::SeqCst)
    }

    /// Room currently joined, if any
    pub fn connected_room(&self) -> Option<String> {
        self.connected_room
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every successfully spoken `(text, voice)` pair, oldest first
    pub fn spoken(&self) -> Vec<(String, String)> {
        self.spoken.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of live receivers across all five streams
    pub fn subscriber_count(&self) -> usize {
        self.speaking_tx.receiver_count()
            + self.synthesis_tx.receiver_count()
            + self.permission_tx.receiver_count()
            + self.events_tx.receiver_count()
            + self.errors_tx.receiver_count()
    }

    async fn maybe_stall(&self) {
        if self.stall.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
    }

    fn set_connected_room(&self, room: Option<String>) {
        *self
            .connected_room
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = room;
    }
}

#[async_trait::async_trait]
impl VoiceBackend for LoopbackBackend {
    async fn connect(&self, room_name: &str, token: &str, require_microphone: bool) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_stall().await;

        if !self.connect_latency.is_zero() {
            tokio::time::sleep(self.connect_latency).await;
        }

        if self.fail_connect.load(Ordering::SeqCst) {
            bail!("{} refused connection to room {}", self.name, room_name);
        }
        if token.is_empty() {
            bail!("{} rejected an empty access token", self.name);
        }

        if require_microphone {
            if self.deny_microphone.load(Ordering::SeqCst) {
                self.permission_tx.send_replace(MicPermission::Denied);
                bail!("{} requires a microphone but access was denied", self.name);
            }
            self.permission_tx.send_replace(MicPermission::Granted);
        }

        self.set_connected_room(Some(room_name.to_string()));
        self.emit_event(
            "connected",
            json!({ "room": room_name, "microphone": require_microphone }),
        );

        info!("{} joined room {}", self.name, room_name);

        Ok(())
    }

    async fn speak(&self, text: &str, voice: &str) -> Result<()> {
        self.speak_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_stall().await;

        if self.connected_room().is_none() {
            bail!("{} cannot speak before joining a room", self.name);
        }

        self.synthesis_tx.send_replace(SynthesisState::Synthesizing);

        if self.fail_speak.load(Ordering::SeqCst) {
            self.synthesis_tx.send_replace(SynthesisState::Error);
            bail!("{} failed to synthesize speech", self.name);
        }

        self.synthesis_tx.send_replace(SynthesisState::Speaking);
        self.speaking_tx.send_replace(true);
        self.emit_event("speech", json!({ "voice": voice, "chars": text.len() }));

        if !self.speech_duration.is_zero() {
            tokio::time::sleep(self.speech_duration).await;
        }

        self.speaking_tx.send_replace(false);
        self.synthesis_tx.send_replace(SynthesisState::Idle);

        if self.connected_room().is_none() {
            bail!("{} speech interrupted: left the room", self.name);
        }

        self.spoken
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((text.to_string(), voice.to_string()));

        debug!("{} spoke {} chars with voice {}", self.name, text.len(), voice);

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.speaking_tx.send_replace(false);
        self.synthesis_tx.send_replace(SynthesisState::Idle);
        self.emit_event("stopped", json!({}));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(room) = self.connected_room() {
            self.set_connected_room(None);
            self.speaking_tx.send_replace(false);
            self.synthesis_tx.send_replace(SynthesisState::Idle);
            self.emit_event("disconnected", json!({ "room": room }));
            info!("{} left room {}", self.name, room);
        }
        Ok(())
    }

    async fn request_microphone_permission(&self) -> Result<bool> {
        self.permission_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_stall().await;

        if self.fail_permission.load(Ordering::SeqCst) {
            bail!("{} microphone prompt failed", self.name);
        }

        let granted = !self.deny_microphone.load(Ordering::SeqCst);
        self.permission_tx.send_replace(if granted {
            MicPermission::Granted
        } else {
            MicPermission::Denied
        });

        Ok(granted)
    }

    fn speaking_state(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }

    fn synthesis_state(&self) -> watch::Receiver<SynthesisState> {
        self.synthesis_tx.subscribe()
    }

    fn mic_permission(&self) -> watch::Receiver<MicPermission> {
        self.permission_tx.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<BackendEvent> {
        self.events_tx.subscribe()
    }

    fn errors(&self) -> broadcast::Receiver<BackendErrorEvent> {
        self.errors_tx.subscribe()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
