//! # Restbench Session Log
//!
//! Bounded in-memory ring buffer of recent user-visible events. Newest
//! entries come first; the oldest entry is evicted at capacity. Every push
//! is mirrored to subscribed sinks as a one-way notification.
//!
//! Messages never contain resolved secrets — callers log template URLs,
//! and error messages are the error's display form, not a backtrace.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use restbench_core::constants::SESSION_LOG_MAX_ENTRIES;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Http,
    /// Remote collection sync; presented as "git".
    Sync,
    Vault,
    System,
    Script,
}

impl LogCategory {
    /// Label shown by presentation sinks.
    pub fn display_name(&self) -> &'static str {
        match self {
            LogCategory::Http => "http",
            LogCategory::Sync => "git",
            LogCategory::Vault => "vault",
            LogCategory::System => "system",
            LogCategory::Script => "script",
        }
    }
}

/// One log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub category: LogCategory,
    /// Short machine-readable kind within the category, e.g. "push".
    pub entry_type: String,
    /// What the event acted on, e.g. a collection name or template URL.
    pub target: String,
    pub message: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// One-way notification sink for presentation layers
pub trait LogSink: Send + Sync {
    fn notify(&self, entry: &LogEntry);
}

/// Bounded session log; clone shares the buffer
#[derive(Clone)]
pub struct SessionLog {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    entries: VecDeque<LogEntry>,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: VecDeque::with_capacity(SESSION_LOG_MAX_ENTRIES),
                sinks: Vec::new(),
            })),
        }
    }

    /// Appends an entry, evicting the oldest at capacity, and notifies
    /// every subscribed sink.
    pub fn push(
        &self,
        category: LogCategory,
        entry_type: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
        success: bool,
    ) -> LogEntry {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            category,
            entry_type: entry_type.into(),
            target: target.into(),
            message: message.into(),
            success,
            timestamp: Utc::now(),
        };
        let sinks = {
            let mut inner = self.lock();
            if inner.entries.len() == SESSION_LOG_MAX_ENTRIES {
                inner.entries.pop_back();
            }
            inner.entries.push_front(entry.clone());
            inner.sinks.clone()
        };
        // Notify outside the lock; sinks may do arbitrary work.
        for sink in sinks {
            sink.notify(&entry);
        }
        entry
    }

    /// Entries newest-first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn subscribe(&self, sink: Arc<dyn LogSink>) {
        self.lock().sinks.push(sink);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("session log lock poisoned")
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_newest_first() {
        let log = SessionLog::new();
        log.push(LogCategory::Http, "send", "{{base_url}}/v1", "200 OK", true);
        log.push(LogCategory::Sync, "push", "Payments API", "pushed 3 files", true);
        let entries = log.entries();
        assert_eq!(entries[0].entry_type, "push");
        assert_eq!(entries[1].entry_type, "send");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = SessionLog::new();
        for i in 0..(SESSION_LOG_MAX_ENTRIES + 5) {
            log.push(LogCategory::System, "tick", i.to_string(), "", true);
        }
        assert_eq!(log.len(), SESSION_LOG_MAX_ENTRIES);
        let entries = log.entries();
        // The newest survives, the first five pushed are gone.
        assert_eq!(entries[0].target, (SESSION_LOG_MAX_ENTRIES + 4).to_string());
        assert!(entries.iter().all(|e| e.target != "0"));
    }

    #[test]
    fn test_sink_notified_per_push() {
        struct Counting(AtomicUsize);
        impl LogSink for Counting {
            fn notify(&self, _entry: &LogEntry) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let log = SessionLog::new();
        let sink = Arc::new(Counting(AtomicUsize::new(0)));
        log.subscribe(sink.clone());
        log.push(LogCategory::Vault, "fetch", "kv/dev", "loaded 3 keys", true);
        log.push(LogCategory::Vault, "fetch", "kv/dev", "forbidden", false);
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sync_category_displays_as_git() {
        assert_eq!(LogCategory::Sync.display_name(), "git");
    }
}
