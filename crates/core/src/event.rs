//! File events and per-event sync outcomes

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::ConflictInfo;

/// What happened to a file at the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Create,
    Write,
    Remove,
    Rename,
}

impl EventKind {
    /// Uppercase wire/history spelling (`CREATE`, `WRITE`, ...)
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Write => "WRITE",
            Self::Remove => "REMOVE",
            Self::Rename => "RENAME",
        }
    }
}

/// A single observed file change.
///
/// Paths are absolute for local sources and logical (relative to the watched
/// root) for cloud sources. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: EventKind,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    #[must_use]
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of applying one event to a destination.
///
/// Syncers produce exactly one of these per consumed event. `err` is carried
/// as a message string so results can cross task and store boundaries.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub event: FileEvent,
    pub src_path: String,
    pub dst_path: String,
    pub err: Option<String>,
    pub conflict: Option<ConflictInfo>,
}

impl SyncResult {
    #[must_use]
    pub fn new(event: FileEvent, src_path: impl Into<String>, dst_path: impl Into<String>) -> Self {
        Self {
            event,
            src_path: src_path.into(),
            dst_path: dst_path.into(),
            err: None,
            conflict: None,
        }
    }

    #[must_use]
    pub fn with_err(mut self, err: impl ToString) -> Self {
        self.err = Some(err.to_string());
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_spelling() {
        assert_eq!(EventKind::Create.as_str(), "CREATE");
        assert_eq!(EventKind::Rename.as_str(), "RENAME");
        assert_eq!(
            serde_yaml::to_string(&EventKind::Write).unwrap().trim(),
            "WRITE"
        );
    }

    #[test]
    fn test_result_success() {
        let event = FileEvent::new(EventKind::Write, "/tmp/a");
        let ok = SyncResult::new(event.clone(), "/tmp/a", "/dst/a");
        assert!(ok.is_success());

        let failed = SyncResult::new(event, "/tmp/a", "/dst/a").with_err("dial timeout");
        assert!(!failed.is_success());
        assert_eq!(failed.err.as_deref(), Some("dial timeout"));
    }
}
