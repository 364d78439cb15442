//! Persistent chat storage
//!
//! Two append-only collections in one embedded database:
//! - `messages`: the conversation history log
//! - `offline-queue`: outbound messages waiting for an external replayer
//!
//! Reads of the queue never consume it; callers clear or acknowledge entries
//! explicitly once delivery is confirmed.

mod messages;
mod store;

pub use messages::{HistoryMessage, QueuedMessage, Role};
pub use store::{ChatStore, DEFAULT_HISTORY_LIMIT};
