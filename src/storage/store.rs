use super::messages::{record_key, HistoryMessage, QueuedMessage};
use crate::error::{VoiceError, VoiceResult};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info};

const MESSAGES_TREE: &str = "messages";
const OFFLINE_QUEUE_TREE: &str = "offline-queue";
const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";
const SCHEMA_VERSION: u32 = 1;

/// Default number of turns returned by [`ChatStore::recent_history`]
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Durable chat history and offline queue
///
/// The database is opened on first use. A failed open is not remembered, and
/// any I/O failure drops the cached handle, so the next call opens it again.
/// One `ChatStore` per path is meant to be shared (behind an `Arc`) by every
/// caller in the process.
pub struct ChatStore {
    path: PathBuf,
    db: Mutex<Option<sled::Db>>,
    last_enqueued_at: AtomicI64,
}

impl ChatStore {
    /// Create a store rooted at `path`; no I/O happens until first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: Mutex::new(None),
            last_enqueued_at: AtomicI64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open (or return the already open) database
    pub async fn open(&self) -> Result<sled::Db> {
        let mut handle = self.db.lock().await;
        if let Some(db) = handle.as_ref() {
            return Ok(db.clone());
        }

        let db = sled::open(&self.path)
            .with_context(|| format!("Failed to open chat store at {}", self.path.display()))?;
        Self::ensure_schema(&db)?;
        db.open_tree(MESSAGES_TREE)?;
        db.open_tree(OFFLINE_QUEUE_TREE)?;

        info!("Opened chat store at {}", self.path.display());

        *handle = Some(db.clone());
        Ok(db)
    }

    fn ensure_schema(db: &sled::Db) -> Result<()> {
        match db.get(SCHEMA_VERSION_KEY)? {
            None => {
                db.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_be_bytes().to_vec())?;
            }
            Some(raw) => {
                let bytes = <[u8; 4]>::try_from(&raw[..])
                    .context("Corrupt schema version record")?;
                let version = u32::from_be_bytes(bytes);
                if version > SCHEMA_VERSION {
                    bail!(
                        "Chat store schema version {} is newer than supported version {}",
                        version,
                        SCHEMA_VERSION
                    );
                }
            }
        }
        Ok(())
    }

    async fn invalidate(&self) {
        self.db.lock().await.take();
    }

    /// Append a dialogue turn
    ///
    /// Returns `Ok(false)` when the store is unavailable; only validation
    /// failures are errors.
    pub async fn append_history(&self, message: &HistoryMessage) -> VoiceResult<bool> {
        message.validate()?;

        match self.try_append_history(message).await {
            Ok(()) => Ok(true),
            Err(e) => {
                error!("Error saving message: {:#}", e);
                self.invalidate().await;
                Ok(false)
            }
        }
    }

    async fn try_append_history(&self, message: &HistoryMessage) -> Result<()> {
        let db = self.open().await?;
        let tree = db.open_tree(MESSAGES_TREE)?;
        let key = record_key(message.timestamp, db.generate_id()?);

        tree.insert(key, serde_json::to_vec(message)?)?;
        tree.flush_async().await?;
        Ok(())
    }

    /// Up to `limit` most recent turns, oldest first
    ///
    /// Returns an empty list when the store is unavailable.
    pub async fn recent_history(&self, limit: usize) -> Vec<HistoryMessage> {
        match self.try_recent_history(limit).await {
            Ok(messages) => messages,
            Err(e) => {
                error!("Error retrieving messages: {:#}", e);
                self.invalidate().await;
                Vec::new()
            }
        }
    }

    async fn try_recent_history(&self, limit: usize) -> Result<Vec<HistoryMessage>> {
        let db = self.open().await?;
        let tree = db.open_tree(MESSAGES_TREE)?;

        let mut messages = tree
            .iter()
            .rev()
            .take(limit)
            .map(|entry| -> Result<HistoryMessage> {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect::<Result<Vec<_>>>()?;

        messages.reverse();
        Ok(messages)
    }

    /// Queue a message for later delivery
    pub async fn enqueue_offline(&self, content: &str) -> VoiceResult<QueuedMessage> {
        if content.is_empty() {
            return Err(VoiceError::StorageValidation {
                record: "offline message",
                field: "content",
                reason: "must not be empty",
            });
        }

        match self.try_enqueue(content).await {
            Ok(message) => Ok(message),
            Err(e) => {
                error!("Error queuing offline message: {:#}", e);
                self.invalidate().await;
                Err(VoiceError::storage_io("enqueue", &e))
            }
        }
    }

    async fn try_enqueue(&self, content: &str) -> Result<QueuedMessage> {
        let db = self.open().await?;
        let tree = db.open_tree(OFFLINE_QUEUE_TREE)?;

        // No await between the clock read and the id, so keys are assigned in call order
        let enqueued_at = self.next_enqueue_timestamp();
        let sequence = db.generate_id()?;

        let message = QueuedMessage {
            content: content.to_string(),
            enqueued_at,
            sequence,
        };

        tree.insert(message.key(), serde_json::to_vec(&message)?)?;
        tree.flush_async().await?;
        Ok(message)
    }

    /// Wall-clock millis, never behind the previous enqueue in this process
    fn next_enqueue_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self.last_enqueued_at.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }

    /// Every queued message, oldest first; the queue is left untouched
    pub async fn drain_offline_queue(&self) -> VoiceResult<Vec<QueuedMessage>> {
        match self.try_read_queue().await {
            Ok(messages) => Ok(messages),
            Err(e) => {
                error!("Error reading offline queue: {:#}", e);
                self.invalidate().await;
                Err(VoiceError::storage_io("read offline queue", &e))
            }
        }
    }

    async fn try_read_queue(&self) -> Result<Vec<QueuedMessage>> {
        let db = self.open().await?;
        let tree = db.open_tree(OFFLINE_QUEUE_TREE)?;

        tree.iter()
            .map(|entry| -> Result<QueuedMessage> {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    /// Drop every queued message
    pub async fn clear_offline_queue(&self) -> VoiceResult<()> {
        if let Err(e) = self.try_clear_queue().await {
            error!("Error clearing offline queue: {:#}", e);
            self.invalidate().await;
            return Err(VoiceError::storage_io("clear offline queue", &e));
        }
        Ok(())
    }

    async fn try_clear_queue(&self) -> Result<()> {
        let db = self.open().await?;
        let tree = db.open_tree(OFFLINE_QUEUE_TREE)?;
        tree.clear()?;
        tree.flush_async().await?;
        Ok(())
    }

    /// Acknowledge one delivered message; returns whether it was still queued
    pub async fn remove_queued(&self, message: &QueuedMessage) -> VoiceResult<bool> {
        match self.try_remove_queued(message).await {
            Ok(removed) => Ok(removed),
            Err(e) => {
                error!("Error acknowledging offline message: {:#}", e);
                self.invalidate().await;
                Err(VoiceError::storage_io("acknowledge offline message", &e))
            }
        }
    }

    async fn try_remove_queued(&self, message: &QueuedMessage) -> Result<bool> {
        let db = self.open().await?;
        let tree = db.open_tree(OFFLINE_QUEUE_TREE)?;
        let removed = tree.remove(message.key())?.is_some();
        tree.flush_async().await?;
        Ok(removed)
    }
}
