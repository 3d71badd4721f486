//! Bounded log of recent sessions.

use crate::artifacts::RequestId;
use crate::color::ColorTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Waiting,
    Simming,
    Canceled,
    Completed,
    Failed,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Waiting => "WAITING",
            Self::Simming => "SIMMING",
            Self::Canceled => "CANCELED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Summary of one session as last seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: RequestId,
    pub requester: String,
    pub rule: String,
    pub submitted: DateTime<Utc>,
    pub generations: u64,
    pub step: u64,
    pub status: Status,
    pub colors: ColorTable,
    pub track: bool,
}

/// Fixed-capacity record of the most recent sessions, oldest evicted first.
#[derive(Debug)]
pub struct ActivityLog {
    capacity: usize,
    entries: Mutex<VecDeque<ActivityEntry>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record a session's current state.
    ///
    /// A session already in the log is updated in place; otherwise it is
    /// added as the newest entry, evicting the oldest if the log is full.
    pub fn record(&self, entry: ActivityEntry) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry;
            return;
        }
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Entries, oldest first.
    pub fn snapshot(&self) -> Vec<ActivityEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// Last recorded status of a session, if it is still in the log.
    pub fn status(&self, id: RequestId) -> Option<Status> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.status)
    }
}
