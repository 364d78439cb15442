use super::config::OrchestratorConfig;
use super::hub::{HubSignal, SubscriptionHub};
use super::state::{ConnectionState, Session, VoiceState};
use crate::backend::{BackendKind, MicPermission, VoiceBackend};
use crate::device::DeviceClass;
use crate::error::{VoiceError, VoiceResult};
use crate::token::TokenIssuer;
use anyhow::{anyhow, Context};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, warn};

/// Longest text excerpt written to the debug log
const SPEECH_PREVIEW_CHARS: usize = 50;

/// Outcome of asking to move off a failed backend
#[derive(Debug, Clone, PartialEq, Eq)]
enum Failover {
    /// This call performed the swap; `dropped_room` is the room that was live
    /// on the failed backend, if any
    Switched { dropped_room: Option<String> },
    /// Another caller had already swapped
    AlreadySwitched,
    /// The fallback itself failed; nothing left to try
    Exhausted,
}

impl Failover {
    fn should_retry(&self) -> bool {
        !matches!(self, Failover::Exhausted)
    }
}

/// Backend currently receiving calls, plus the hub bound to its streams.
/// Both change together under one lock.
struct Selection {
    active: BackendKind,
    hub: SubscriptionHub,
}

struct Inner {
    config: OrchestratorConfig,
    primary: Arc<dyn VoiceBackend>,
    fallback: Arc<dyn VoiceBackend>,
    tokens: Arc<dyn TokenIssuer>,
    constrained: bool,
    user_id: String,

    state: Arc<watch::Sender<VoiceState>>,
    selection: Mutex<Selection>,

    /// Single-flight guards
    connect_flight: Mutex<()>,
    speak_flight: Mutex<()>,

    /// Bumped by `disconnect`; lets late connects notice they were cancelled
    session_epoch: AtomicU64,
    /// Bumped by every successful connect
    connects_completed: AtomicU64,
}

/// Voice session orchestrator
///
/// Owns the session state machine and decides which backend serves each
/// call. Cloning is cheap; all clones drive the same session.
///
/// Failover policy: a call that fails on the primary switches the whole
/// orchestrator to the fallback and retries once there. A call that fails on
/// the fallback reports its error. No call makes more than two attempts.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    /// Create an orchestrator and bind the initial backend's streams
    ///
    /// Constrained devices start on the fallback backend. Must be called from
    /// within a tokio runtime.
    pub async fn new(
        config: OrchestratorConfig,
        primary: Arc<dyn VoiceBackend>,
        fallback: Arc<dyn VoiceBackend>,
        tokens: Arc<dyn TokenIssuer>,
        device: &dyn DeviceClass,
    ) -> Self {
        let constrained = device.is_constrained();
        let active = if constrained {
            BackendKind::Fallback
        } else {
            BackendKind::Primary
        };

        let (state, _) = watch::channel(VoiceState::new(active, constrained, config.debug_capacity));
        let state = Arc::new(state);
        if constrained {
            state.send_modify(|s| {
                s.debug
                    .push("Running on constrained device, using fallback voice service")
            });
        }

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let mut hub = SubscriptionHub::new(Arc::clone(&state), signal_tx);
        let initial = if constrained { &fallback } else { &primary };
        hub.rebind(active, initial).await;

        let inner = Arc::new(Inner {
            config,
            primary,
            fallback,
            tokens,
            constrained,
            user_id: uuid::Uuid::new_v4().to_string(),
            state,
            selection: Mutex::new(Selection { active, hub }),
            connect_flight: Mutex::new(()),
            speak_flight: Mutex::new(()),
            session_epoch: AtomicU64::new(0),
            connects_completed: AtomicU64::new(0),
        });

        tokio::spawn(supervise(Arc::downgrade(&inner), signal_rx));

        info!(
            "Voice orchestrator ready (user {}, {} backend active)",
            inner.user_id, active
        );

        Self { inner }
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<VoiceState> {
        self.inner.state.subscribe()
    }

    /// Current state
    pub fn snapshot(&self) -> VoiceState {
        self.inner.state.borrow().clone()
    }

    pub fn session(&self) -> Session {
        self.inner.state.borrow().session()
    }

    pub fn active_backend(&self) -> BackendKind {
        self.inner.state.borrow().active_backend
    }

    /// Identity used when requesting access tokens
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn is_constrained_device(&self) -> bool {
        self.inner.constrained
    }

    /// Join `room_name`, or a freshly named room when `None`
    ///
    /// A call that queued behind another in-flight connect returns that
    /// connect's session when it already satisfies the request.
    pub async fn connect(&self, room_name: Option<String>) -> VoiceResult<Session> {
        let requested = room_name.filter(|r| !r.trim().is_empty());
        let ticket = self.inner.connects_completed.load(Ordering::SeqCst);

        let _flight = self.inner.connect_flight.lock().await;

        if self.inner.connects_completed.load(Ordering::SeqCst) != ticket {
            let existing = {
                let state = self.inner.state.borrow();
                let satisfied = state.is_connected_on(state.active_backend)
                    && requested.as_deref().map_or(true, |r| r == state.room_name);
                satisfied.then(|| state.session())
            };
            if let Some(session) = existing {
                return Ok(session);
            }
        }

        self.inner.connect_locked(requested).await
    }

    /// Speak `text`, connecting first if needed
    pub async fn speak(&self, text: &str, voice: Option<&str>) -> VoiceResult<()> {
        let epoch = self.inner.session_epoch.load(Ordering::SeqCst);
        let voice = self.inner.config.normalize_voice(voice);
        self.inner.log(format!("Using voice: {}", voice));

        let _flight = self.inner.speak_flight.lock().await;

        let connected = self.inner.state.borrow().is_connected();
        if !connected {
            let room = self.inner.current_room();
            self.connect(room).await?;
        }

        self.inner.log(format!(
            "Speaking text using {} service: {}",
            self.active_backend().label(),
            preview(text)
        ));

        let result = self
            .inner
            .run_with_failover("speak", Some(epoch), |kind, backend| {
                self.inner
                    .attempt_speak(kind, backend, text.to_string(), voice.clone(), epoch)
            })
            .await;

        if let Err(err) = &result {
            self.inner.record_failure(err, true, Some(epoch));
        }
        result
    }

    /// Interrupt current speech; failures are only logged
    pub async fn stop_speaking(&self) {
        let (kind, backend) = self.inner.active().await;

        match self.inner.bounded("stop", backend.stop()).await {
            Ok(()) => self
                .inner
                .log(format!("Stopping speech using {} service", kind.label())),
            Err(err) => {
                warn!("Failed to stop speech on {} backend: {:#}", kind, err);
                self.inner
                    .log(format!("Error stopping speech: {}", VoiceError::synthesis(kind, &err)));
            }
        }
    }

    /// Leave the room and reset the session
    ///
    /// Does not wait for in-flight `connect`/`speak` calls; a connect that
    /// completes afterwards is torn down and reports an error.
    pub async fn disconnect(&self) {
        self.inner.session_epoch.fetch_add(1, Ordering::SeqCst);
        let (kind, backend) = self.inner.active().await;

        if let Err(err) = self.inner.bounded("disconnect", backend.disconnect()).await {
            warn!("Failed to disconnect {} backend: {:#}", kind, err);
            self.inner.log(format!("Error disconnecting: {:#}", err));
        }

        self.inner.state.send_modify(|s| {
            s.connection_state = ConnectionState::Disconnected;
            s.room_name.clear();
            s.connected_backend = None;
            s.debug.push(format!(
                "Disconnected from voice room using {} service",
                kind.label()
            ));
        });
    }

    /// Ask for microphone access
    ///
    /// Constrained devices never prompt: they report `false` and move to the
    /// fallback backend. A denial also moves to the fallback.
    pub async fn request_microphone_permission(&self) -> VoiceResult<bool> {
        if self.inner.constrained {
            self.inner
                .log("On constrained device, skipping microphone permission request");
            self.inner
                .fail_over(BackendKind::Primary, "constrained device")
                .await;
            return Ok(false);
        }

        let result = self
            .inner
            .run_with_failover("microphone permission", None, |kind, backend| {
                self.inner.attempt_permission(kind, backend)
            })
            .await;

        match result {
            Ok((kind, granted)) => {
                self.inner.state.send_modify(|s| {
                    s.mic_permission = if granted {
                        MicPermission::Granted
                    } else {
                        MicPermission::Denied
                    };
                    s.debug.push(format!(
                        "Microphone permission {}",
                        if granted { "granted" } else { "denied" }
                    ));
                });
                if !granted {
                    self.inner
                        .fail_over(kind, "microphone permission denied")
                        .await;
                }
                Ok(granted)
            }
            Err(err) => {
                self.inner.record_failure(&err, false, None);
                Err(err)
            }
        }
    }
}

impl Inner {
    fn backend(&self, kind: BackendKind) -> Arc<dyn VoiceBackend> {
        match kind {
            BackendKind::Primary => Arc::clone(&self.primary),
            BackendKind::Fallback => Arc::clone(&self.fallback),
        }
    }

    /// Active backend; waits for any swap in progress
    async fn active(&self) -> (BackendKind, Arc<dyn VoiceBackend>) {
        let selection = self.selection.lock().await;
        (selection.active, self.backend(selection.active))
    }

    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        self.state.send_modify(|s| s.debug.push(message));
    }

    /// Room to rejoin when reconnecting implicitly
    fn current_room(&self) -> Option<String> {
        let state = self.state.borrow();
        (!state.room_name.is_empty()).then(|| state.room_name.clone())
    }

    /// Apply the configured timeout to a backend call
    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        match self.config.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| anyhow!("{} timed out after {:?}", operation, limit))?,
            None => call.await,
        }
    }

    /// Whether `disconnect` was called since `epoch` was read
    fn is_cancelled(&self, epoch: u64) -> bool {
        self.session_epoch.load(Ordering::SeqCst) != epoch
    }

    /// Run `attempt` on the active backend, failing over and retrying once
    ///
    /// A call cancelled by `disconnect` (its `epoch` went stale) reports its
    /// error without failing over.
    async fn run_with_failover<T, F, Fut>(
        &self,
        operation: &str,
        epoch: Option<u64>,
        mut attempt: F,
    ) -> VoiceResult<T>
    where
        F: FnMut(BackendKind, Arc<dyn VoiceBackend>) -> Fut,
        Fut: Future<Output = VoiceResult<T>>,
    {
        let (kind, backend) = self.active().await;
        let err = match attempt(kind, backend).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        self.log(format!("Error during {} on {} service: {}", operation, kind.label(), err));

        if epoch.is_some_and(|epoch| self.is_cancelled(epoch)) {
            return Err(err);
        }
        if !self.fail_over(kind, &err.to_string()).await.should_retry() {
            return Err(err);
        }

        let (kind, backend) = self.active().await;
        attempt(kind, backend).await.map_err(|err| {
            self.log(format!("Error during {} on {} service: {}", operation, kind.label(), err));
            err
        })
    }

    /// Move off `failed` if it is still the active backend
    ///
    /// The check and the swap happen under the selection lock, so concurrent
    /// failures of the same backend produce exactly one swap.
    async fn fail_over(&self, failed: BackendKind, reason: &str) -> Failover {
        if failed == BackendKind::Fallback {
            return Failover::Exhausted;
        }

        let dropped_room = {
            let mut selection = self.selection.lock().await;
            if selection.active == BackendKind::Fallback {
                return Failover::AlreadySwitched;
            }

            let mut dropped_room = None;
            self.state.send_modify(|s| {
                s.active_backend = BackendKind::Fallback;
                if s.connected_backend == Some(failed) {
                    dropped_room = Some(s.room_name.clone());
                    s.connected_backend = None;
                    s.connection_state = ConnectionState::Connecting;
                }
                s.debug
                    .push(format!("Switching to fallback voice service ({})", reason));
            });

            selection.active = BackendKind::Fallback;
            let fallback = Arc::clone(&self.fallback);
            selection.hub.rebind(BackendKind::Fallback, &fallback).await;
            dropped_room
        };

        info!("Failed over from {} backend: {}", failed, reason);

        if dropped_room.is_some() {
            let failed_backend = self.backend(failed);
            if let Err(err) = self.bounded("disconnect", failed_backend.disconnect()).await {
                warn!("Failed to release {} backend after failover: {:#}", failed, err);
            }
        }

        Failover::Switched { dropped_room }
    }

    async fn connect_locked(&self, requested: Option<String>) -> VoiceResult<Session> {
        let room = requested.unwrap_or_else(generate_room_name);
        let epoch = self.session_epoch.load(Ordering::SeqCst);

        self.state
            .send_modify(|s| s.connection_state = ConnectionState::Connecting);

        let result = self
            .run_with_failover("connect", Some(epoch), |kind, backend| {
                self.attempt_connect(kind, backend, room.clone())
            })
            .await;

        match result {
            Ok(kind) => {
                if self.is_cancelled(epoch) {
                    return Err(self.abandon_connect(kind, &room).await);
                }
                self.mark_connected(kind, &room);
                Ok(self.state.borrow().session())
            }
            Err(err) => {
                self.record_failure(&err, true, Some(epoch));
                Err(err)
            }
        }
    }

    async fn attempt_connect(
        &self,
        kind: BackendKind,
        backend: Arc<dyn VoiceBackend>,
        room: String,
    ) -> VoiceResult<BackendKind> {
        let token = self
            .bounded("token issuance", self.tokens.issue(&room, &self.user_id))
            .await
            .context("Failed to obtain access token")
            .map_err(|err| VoiceError::connection(kind, &room, &err))?;

        self.bounded("connect", backend.connect(&room, &token, !self.constrained))
            .await
            .map_err(|err| VoiceError::connection(kind, &room, &err))?;

        Ok(kind)
    }

    fn mark_connected(&self, kind: BackendKind, room: &str) {
        self.state.send_modify(|s| {
            s.connection_state = ConnectionState::Connected;
            s.room_name = room.to_string();
            s.connected_backend = Some(kind);
            s.error = None;
            s.debug.push(format!(
                "Connected to voice room: {} using {} service",
                room,
                kind.label()
            ));
        });
        self.connects_completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo a connect that finished after `disconnect` was called
    async fn abandon_connect(&self, kind: BackendKind, room: &str) -> VoiceError {
        let backend = self.backend(kind);
        if let Err(err) = self.bounded("disconnect", backend.disconnect()).await {
            warn!("Failed to release abandoned connection: {:#}", err);
        }
        self.log(format!("Discarded connection to {} after disconnect", room));

        cancelled_connect(kind, room)
    }

    async fn attempt_speak(
        &self,
        kind: BackendKind,
        backend: Arc<dyn VoiceBackend>,
        text: String,
        voice: String,
        epoch: u64,
    ) -> VoiceResult<()> {
        // After a failover the live connection belongs to the other backend
        let connected = self.state.borrow().is_connected_on(kind);
        if !connected {
            self.rejoin(kind, &backend, epoch).await?;
        }

        self.bounded("speak", backend.speak(&text, &voice))
            .await
            .map_err(|err| VoiceError::synthesis(kind, &err))
    }

    /// Join the current room on `kind` ahead of a retried call
    ///
    /// Serialized with every other connect; a connect that finished while this
    /// one waited (the stream supervisor's rejoin, say) is reused.
    async fn rejoin(
        &self,
        kind: BackendKind,
        backend: &Arc<dyn VoiceBackend>,
        epoch: u64,
    ) -> VoiceResult<()> {
        let _flight = self.connect_flight.lock().await;

        let connected = self.state.borrow().is_connected_on(kind);
        if connected {
            return Ok(());
        }

        let room = self.current_room().unwrap_or_else(generate_room_name);
        if self.is_cancelled(epoch) {
            return Err(cancelled_connect(kind, &room));
        }

        self.attempt_connect(kind, Arc::clone(backend), room.clone())
            .await?;
        if self.is_cancelled(epoch) {
            return Err(self.abandon_connect(kind, &room).await);
        }

        self.mark_connected(kind, &room);
        Ok(())
    }

    async fn attempt_permission(
        &self,
        kind: BackendKind,
        backend: Arc<dyn VoiceBackend>,
    ) -> VoiceResult<(BackendKind, bool)> {
        self.bounded("microphone permission", backend.request_microphone_permission())
            .await
            .map(|granted| (kind, granted))
            .map_err(|err| VoiceError::permission(kind, &err))
    }

    /// Publish a final failure
    ///
    /// Connection-affecting failures also move the session to `Failing`,
    /// unless the session was disconnected since `epoch`.
    fn record_failure(&self, err: &VoiceError, affects_connection: bool, epoch: Option<u64>) {
        if epoch.is_some_and(|epoch| self.is_cancelled(epoch)) {
            return;
        }

        error!("Voice operation failed: {}", err);
        self.state.send_modify(|s| {
            s.error = Some(err.clone());
            if affects_connection {
                s.connection_state = ConnectionState::Failing;
            }
        });
    }
}

/// Apply failover requests raised by backend streams
async fn supervise(weak: Weak<Inner>, mut signals: mpsc::UnboundedReceiver<HubSignal>) {
    while let Some(signal) = signals.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };

        let epoch = inner.session_epoch.load(Ordering::SeqCst);
        let Failover::Switched { dropped_room } =
            inner.fail_over(BackendKind::Primary, &signal.reason()).await
        else {
            continue;
        };

        // Rejoin the same room on the fallback, unless the user left meanwhile
        if let Some(room) = dropped_room {
            let _flight = inner.connect_flight.lock().await;
            if inner.is_cancelled(epoch) {
                continue;
            }
            if let Err(err) = inner.connect_locked(Some(room)).await {
                warn!("Failed to rejoin room on fallback backend: {}", err);
            }
        }
    }
}

fn cancelled_connect(kind: BackendKind, room: &str) -> VoiceError {
    VoiceError::Connection {
        backend: kind,
        room: room.to_string(),
        message: "session was disconnected while connecting".to_string(),
    }
}

/// Fresh collision-resistant room identifier
pub fn generate_room_name() -> String {
    format!("lark-room-{}", uuid::Uuid::new_v4())
}

fn preview(text: &str) -> String {
    if text.chars().count() <= SPEECH_PREVIEW_CHARS {
        return text.to_string();
    }
    let excerpt: String = text.chars().take(SPEECH_PREVIEW_CHARS).collect();
    format!("{}...", excerpt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_room_names_are_unique() {
        let a = generate_room_name();
        let b = generate_room_name();

        assert!(a.starts_with("lark-room-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "x".repeat(80);

        assert_eq!(preview("short"), "short");
        assert_eq!(preview(&long), format!("{}...", "x".repeat(50)));
    }
}
