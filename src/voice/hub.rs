use super::state::{replace_if_changed, VoiceState};
use crate::backend::{
    BackendErrorEvent, BackendErrorKind, BackendKind, MicPermission, VoiceBackend,
};
use crate::error::VoiceError;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Failover request raised by a stream rather than by a failed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HubSignal {
    PermissionDenied,
    BackendError(String),
}

impl HubSignal {
    pub(crate) fn reason(&self) -> String {
        match self {
            HubSignal::PermissionDenied => "microphone permission denied".to_string(),
            HubSignal::BackendError(message) => format!("backend error: {}", message),
        }
    }
}

/// All five stream subscriptions of one backend, torn down as a unit
///
/// Dropping the handle aborts every forwarding task; [`Subscription::cancel`]
/// also waits until they have stopped.
pub struct Subscription {
    backend: BackendKind,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Number of live forwarding tasks
    pub fn len(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort all forwarding tasks and wait for them to finish
    pub async fn cancel(mut self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        futures::future::join_all(tasks).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Forwards the active backend's streams into orchestrator state
pub struct SubscriptionHub {
    state: Arc<watch::Sender<VoiceState>>,
    signals: mpsc::UnboundedSender<HubSignal>,
    current: Option<Subscription>,
}

impl SubscriptionHub {
    pub(crate) fn new(
        state: Arc<watch::Sender<VoiceState>>,
        signals: mpsc::UnboundedSender<HubSignal>,
    ) -> Self {
        Self {
            state,
            signals,
            current: None,
        }
    }

    /// Backend whose streams are currently forwarded
    pub fn bound_backend(&self) -> Option<BackendKind> {
        self.current.as_ref().map(Subscription::backend)
    }

    /// Replace the current binding with `backend`'s streams
    ///
    /// Every task of the previous binding has stopped before the first new
    /// one is spawned, so no event from the old backend lands afterwards.
    pub async fn rebind(&mut self, kind: BackendKind, backend: &Arc<dyn VoiceBackend>) {
        if let Some(previous) = self.current.take() {
            let previous_kind = previous.backend();
            previous.cancel().await;
            info!("Unsubscribed from {} backend streams", previous_kind);
        }

        let tasks = vec![
            self.forward_speaking(backend),
            self.forward_synthesis(backend),
            self.forward_permission(kind, backend),
            self.forward_events(backend),
            self.forward_errors(kind, backend),
        ];

        self.state.send_modify(|s| {
            s.debug.push(format!(
                "Subscribed to {} voice service ({})",
                kind.label(),
                backend.name()
            ))
        });

        self.current = Some(Subscription {
            backend: kind,
            tasks,
        });
    }

    fn forward_speaking(&self, backend: &Arc<dyn VoiceBackend>) -> JoinHandle<()> {
        forward_watch(backend.speaking_state(), Arc::clone(&self.state), |s, speaking| {
            replace_if_changed(&mut s.is_speaking, speaking)
        })
    }

    fn forward_synthesis(&self, backend: &Arc<dyn VoiceBackend>) -> JoinHandle<()> {
        forward_watch(backend.synthesis_state(), Arc::clone(&self.state), |s, synthesis| {
            replace_if_changed(&mut s.synthesis_state, synthesis)
        })
    }

    fn forward_permission(
        &self,
        kind: BackendKind,
        backend: &Arc<dyn VoiceBackend>,
    ) -> JoinHandle<()> {
        let signals = self.signals.clone();
        forward_watch(backend.mic_permission(), Arc::clone(&self.state), move |s, permission| {
            if !replace_if_changed(&mut s.mic_permission, permission) {
                return false;
            }
            s.debug.push(format!("Microphone permission: {}", permission));

            if permission == MicPermission::Denied && kind == BackendKind::Primary {
                s.debug
                    .push("Microphone permission denied, switching to fallback voice service");
                let _ = signals.send(HubSignal::PermissionDenied);
            }
            true
        })
    }

    fn forward_events(&self, backend: &Arc<dyn VoiceBackend>) -> JoinHandle<()> {
        forward_broadcast(backend.events(), Arc::clone(&self.state), |s, event| {
            s.debug.push(format!(
                "Voice service event: {} - {}",
                event.kind, event.payload
            ));
        })
    }

    fn forward_errors(&self, kind: BackendKind, backend: &Arc<dyn VoiceBackend>) -> JoinHandle<()> {
        let signals = self.signals.clone();
        forward_broadcast(backend.errors(), Arc::clone(&self.state), move |s, event| {
            warn!("{} backend reported error: {}", kind, event.message);
            s.debug.push(format!("Voice service error: {}", event.message));
            s.error = Some(error_from_event(kind, &s.room_name, &event));

            if kind == BackendKind::Primary {
                s.debug
                    .push("Error in standard voice service, switching to fallback");
                let _ = signals.send(HubSignal::BackendError(event.message));
            }
        })
    }
}

fn error_from_event(kind: BackendKind, room: &str, event: &BackendErrorEvent) -> VoiceError {
    let message = event.message.clone();
    match event.kind {
        BackendErrorKind::Permission => VoiceError::Permission {
            backend: kind,
            message,
        },
        BackendErrorKind::Connection => VoiceError::Connection {
            backend: kind,
            room: room.to_string(),
            message,
        },
        BackendErrorKind::Synthesis => VoiceError::Synthesis {
            backend: kind,
            message,
        },
    }
}

/// Mirror a state stream, starting with its current value
fn forward_watch<T, F>(
    mut rx: watch::Receiver<T>,
    state: Arc<watch::Sender<VoiceState>>,
    mut apply: F,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(&mut VoiceState, T) -> bool + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let value = rx.borrow_and_update().clone();
            state.send_if_modified(|s| apply(s, value));

            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Relay a notification stream until the backend closes it
fn forward_broadcast<T, F>(
    mut rx: broadcast::Receiver<T>,
    state: Arc<watch::Sender<VoiceState>>,
    mut apply: F,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: FnMut(&mut VoiceState, T) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(value) => state.send_modify(|s| apply(s, value)),
                Err(RecvError::Lagged(skipped)) => state.send_modify(|s| {
                    s.debug
                        .push(format!("Dropped {} voice service notifications", skipped))
                }),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LoopbackBackend, LoopbackConfig};
    use std::time::Duration;

    fn hub() -> (SubscriptionHub, mpsc::UnboundedReceiver<HubSignal>) {
        let (state, _) = watch::channel(VoiceState::new(BackendKind::Primary, false, 10));
        let (signals, signal_rx) = mpsc::unbounded_channel();
        (SubscriptionHub::new(Arc::new(state), signals), signal_rx)
    }

    fn loopback(name: &str) -> Arc<LoopbackBackend> {
        Arc::new(LoopbackBackend::new(name, LoopbackConfig::default()))
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_rebind_tears_down_previous_subscription() {
        let (mut hub, _signals) = hub();
        assert_eq!(hub.bound_backend(), None);

        let primary = loopback("primary");
        let fallback = loopback("fallback");
        let primary_backend: Arc<dyn VoiceBackend> = primary.clone();
        let fallback_backend: Arc<dyn VoiceBackend> = fallback.clone();

        hub.rebind(BackendKind::Primary, &primary_backend).await;
        assert_eq!(hub.bound_backend(), Some(BackendKind::Primary));
        assert_eq!(hub.current.as_ref().map(Subscription::len), Some(5));
        assert_eq!(primary.subscriber_count(), 5);

        hub.rebind(BackendKind::Fallback, &fallback_backend).await;
        assert_eq!(hub.bound_backend(), Some(BackendKind::Fallback));
        assert_eq!(primary.subscriber_count(), 0);
        assert_eq!(fallback.subscriber_count(), 5);
    }

    #[tokio::test]
    async fn test_subscription_ends_when_backend_goes_away() {
        let (mut hub, _signals) = hub();
        let backend: Arc<dyn VoiceBackend> = loopback("primary");

        hub.rebind(BackendKind::Primary, &backend).await;
        drop(backend);

        eventually(|| hub.current.as_ref().map_or(true, Subscription::is_empty)).await;
        assert_eq!(hub.bound_backend(), Some(BackendKind::Primary));
    }

    #[tokio::test]
    async fn test_dropping_subscription_releases_streams() {
        let (mut hub, _signals) = hub();
        let primary = loopback("primary");
        let backend: Arc<dyn VoiceBackend> = primary.clone();

        hub.rebind(BackendKind::Primary, &backend).await;
        let subscription = hub.current.take().unwrap();
        assert!(!subscription.is_empty());

        drop(subscription);
        eventually(|| primary.subscriber_count() == 0).await;
    }

    #[tokio::test]
    async fn test_denied_permission_signals_only_for_primary() {
        let (mut hub, mut signals) = hub();
        let primary = loopback("primary");
        let fallback = loopback("fallback");
        let primary_backend: Arc<dyn VoiceBackend> = primary.clone();
        let fallback_backend: Arc<dyn VoiceBackend> = fallback.clone();

        hub.rebind(BackendKind::Fallback, &fallback_backend).await;
        fallback.set_mic_permission(MicPermission::Denied);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(signals.try_recv().is_err());

        hub.rebind(BackendKind::Primary, &primary_backend).await;
        primary.set_mic_permission(MicPermission::Denied);
        let signal = tokio::time::timeout(Duration::from_secs(1), signals.recv())
            .await
            .unwrap();
        assert_eq!(signal, Some(HubSignal::PermissionDenied));
    }
}
