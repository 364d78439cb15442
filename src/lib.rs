pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod http;
pub mod storage;
pub mod token;
pub mod voice;

pub use backend::{
    BackendFactory, BackendKind, BackendSettings, LoopbackBackend, LoopbackConfig, MicPermission,
    SynthesisState, VoiceBackend,
};
pub use config::Config;
pub use device::{DeviceClass, DeviceProfile};
pub use error::{VoiceError, VoiceResult};
pub use http::{create_router, AppState};
pub use storage::{ChatStore, HistoryMessage, QueuedMessage, Role};
pub use token::{DevTokenIssuer, TokenIssuer};
pub use voice::{
    ConnectionState, DebugRingBuffer, OrchestratorConfig, Session, SessionOrchestrator,
    VoiceState,
};
