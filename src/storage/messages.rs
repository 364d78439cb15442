use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};

/// Speaker of a dialogue turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A persisted turn of dialogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Speaker; `None` only for malformed input, which `validate` rejects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Turn text
    #[serde(default)]
    pub content: String,

    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
}

impl HistoryMessage {
    pub fn new(role: Role, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: Some(role),
            content: content.into(),
            timestamp,
        }
    }

    /// Reject structurally incomplete messages before touching storage
    pub fn validate(&self) -> VoiceResult<()> {
        if self.role.is_none() {
            return Err(VoiceError::StorageValidation {
                record: "history message",
                field: "role",
                reason: "must be present",
            });
        }
        if self.content.is_empty() {
            return Err(VoiceError::StorageValidation {
                record: "history message",
                field: "content",
                reason: "must not be empty",
            });
        }
        if self.timestamp <= 0 {
            return Err(VoiceError::StorageValidation {
                record: "history message",
                field: "timestamp",
                reason: "must be a positive millisecond timestamp",
            });
        }
        Ok(())
    }
}

/// Outbound text waiting for delivery
///
/// Serialized with the field names the offline replayer reads
/// (`message`, `timestamp`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    #[serde(rename = "message")]
    pub content: String,

    /// Milliseconds since the Unix epoch
    #[serde(rename = "timestamp")]
    pub enqueued_at: i64,

    /// Store-wide tiebreaker for entries sharing a millisecond
    #[serde(default)]
    pub sequence: u64,
}

impl QueuedMessage {
    pub(crate) fn key(&self) -> [u8; 16] {
        record_key(self.enqueued_at, self.sequence)
    }
}

/// Big-endian `(timestamp, sequence)` key; byte order equals numeric order
pub(crate) fn record_key(timestamp: i64, sequence: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&(timestamp.max(0) as u64).to_be_bytes());
    key[8..].copy_from_slice(&sequence.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_content() {
        let msg = HistoryMessage::new(Role::User, "", 1_700_000_000_000);

        assert!(matches!(
            msg.validate(),
            Err(VoiceError::StorageValidation { field: "content", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_timestamp() {
        let msg: HistoryMessage =
            serde_json::from_str(r#"{"role": "assistant", "content": "hi"}"#).unwrap();

        assert!(matches!(
            msg.validate(),
            Err(VoiceError::StorageValidation { field: "timestamp", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_role() {
        let msg: HistoryMessage =
            serde_json::from_str(r#"{"content": "hi", "timestamp": 1000}"#).unwrap();

        assert_eq!(msg.role, None);
        assert!(matches!(
            msg.validate(),
            Err(VoiceError::StorageValidation { field: "role", .. })
        ));
    }

    #[test]
    fn test_queued_message_wire_names() {
        let msg = QueuedMessage {
            content: "hello".to_string(),
            enqueued_at: 42,
            sequence: 7,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["message"], "hello");
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn test_record_keys_order_by_timestamp_then_sequence() {
        assert!(record_key(1, 99) < record_key(2, 0));
        assert!(record_key(5, 1) < record_key(5, 2));
        assert!(record_key(255, 0) < record_key(256, 0));
    }
}
