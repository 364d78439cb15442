use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

/// Maximum number of debug messages kept by default
pub const DEFAULT_DEBUG_CAPACITY: usize = 50;

/// A single orchestration decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl DebugEntry {
    /// `[2025-01-01T12:00:00.000Z] message`
    pub fn render(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message
        )
    }
}

/// Fixed-capacity log; the oldest entry is evicted first
#[derive(Debug, Clone)]
pub struct DebugRingBuffer {
    capacity: usize,
    entries: VecDeque<DebugEntry>,
}

impl DebugRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a message (also emitted as a tracing event)
    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(target: "lark_voice::debug", "{}", message);

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(DebugEntry {
            timestamp: Utc::now(),
            message,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &DebugEntry> {
        self.entries.iter()
    }

    /// Rendered lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(DebugEntry::render).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DebugRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBUG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_entries_are_evicted() {
        let mut buffer = DebugRingBuffer::new(3);

        for i in 0..5 {
            buffer.push(format!("message {}", i));
        }

        let messages: Vec<&str> = buffer.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["message 2", "message 3", "message 4"]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_rendered_line_is_timestamped() {
        let mut buffer = DebugRingBuffer::default();
        buffer.push("Connected");

        let line = &buffer.lines()[0];
        assert!(line.starts_with('['), "line should start with a timestamp: {}", line);
        assert!(line.ends_with("Z] Connected"), "unexpected line: {}", line);
        assert_eq!(buffer.capacity(), DEFAULT_DEBUG_CAPACITY);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buffer = DebugRingBuffer::new(0);
        buffer.push("a");
        buffer.push("b");

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.entries().next().unwrap().message, "b");
    }
}
