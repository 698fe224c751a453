//! Per-session message history for debugging and diagnostics.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::codec::Message;

/// Direction of a recorded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Send,
    Receive,
}

/// A recorded protocol exchange step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub direction: Direction,
    /// Message kind name (e.g. `query_request`).
    pub kind: String,
    /// Correlation token the message carried.
    pub sn: String,
    /// Seconds since history creation
    pub timestamp: f64,
}

/// Tracks the recent protocol traffic of one session.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    entries: Vec<HistoryEntry>,
    send_count: usize,
    receive_count: usize,
    last_error: Option<String>,
    start_time: Instant,
    max_entries: usize,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHistory {
    pub const DEFAULT_MAX_ENTRIES: usize = 100;

    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            send_count: 0,
            receive_count: 0,
            last_error: None,
            start_time: Instant::now(),
            max_entries: Self::DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::new()
        }
    }

    pub fn record(&mut self, direction: Direction, message: &Message) {
        match direction {
            Direction::Send => self.send_count += 1,
            Direction::Receive => self.receive_count += 1,
        }

        self.entries.push(HistoryEntry {
            direction,
            kind: message.kind_name().to_string(),
            sn: message.sn().to_string(),
            timestamp: self.start_time.elapsed().as_secs_f64(),
        });

        if self.entries.len() > self.max_entries {
            self.entries.remove(0);
        }
    }

    pub fn record_error(&mut self, error: &str) {
        self.last_error = Some(error.to_string());
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.send_count = 0;
        self.receive_count = 0;
        self.last_error = None;
    }

    pub fn summary(&self) -> HistorySummary {
        HistorySummary {
            send_count: self.send_count,
            receive_count: self.receive_count,
            total_entries: self.entries.len(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Summary of message history for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    pub send_count: usize,
    pub receive_count: usize,
    pub total_entries: usize,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_message() {
        let mut history = MessageHistory::new();
        history.record(
            Direction::Send,
            &Message::QueryRequest {
                sn: "t1".into(),
                attrs: vec![],
            },
        );

        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].kind, "query_request");
        assert_eq!(history.summary().send_count, 1);
    }

    #[test]
    fn test_record_error() {
        let mut history = MessageHistory::new();
        history.record_error("socket receive error");
        assert_eq!(history.last_error(), Some("socket receive error"));
    }

    #[test]
    fn test_max_entries() {
        let mut history = MessageHistory::with_max_entries(2);
        for i in 0..5 {
            history.record(
                Direction::Send,
                &Message::DiscoverProbe {
                    sn: format!("t{i}"),
                },
            );
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.summary().send_count, 5);
    }
}
