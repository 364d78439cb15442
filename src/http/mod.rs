//! HTTP API for the device UI
//!
//! Voice session control:
//! - GET /voice/state - Reactive state snapshot
//! - POST /voice/connect - Join a room (optional `room_name`)
//! - POST /voice/speak - Speak text (connects first if needed)
//! - POST /voice/stop - Interrupt speech
//! - POST /voice/disconnect - Leave the room
//! - POST /voice/microphone - Request microphone permission
//!
//! Chat persistence:
//! - GET|POST /chat/history - Read / append dialogue turns
//! - GET|POST|DELETE /chat/offline-queue - Read / enqueue / clear queued messages
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
