use crate::storage::ChatStore;
use crate::voice::SessionOrchestrator;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Voice session driven by the UI
    pub orchestrator: SessionOrchestrator,

    /// Chat history and offline queue (not owned by the orchestrator)
    pub store: Arc<ChatStore>,
}

impl AppState {
    pub fn new(orchestrator: SessionOrchestrator, store: Arc<ChatStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }
}
