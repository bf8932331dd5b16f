//! Jobs, their lifecycle status, and history rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an endpoint lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointKind {
    Local,
    RemoteTcp,
    GoogleDrive,
    Dropbox,
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Active,
    Paused,
    Stopped,
}

/// A configured (source, destination) pair, persisted by the external store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub src_type: EndpointKind,
    pub src_path: String,
    pub dst_type: EndpointKind,
    pub dst_path: String,
    pub status: JobStatus,
    /// Assigned lazily on first receive-job start, then remembered
    pub recv_port: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable view of a running job for the control API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: i64,
    pub src: String,
    pub dst: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub synced: u64,
    pub failed: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Terminal outcome of one sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncOutcome {
    Success,
    Failed,
}

/// One row of durable sync history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub event_type: SyncOutcome,
    pub src_path: String,
    pub dst_path: String,
    pub file_event: String,
    pub err_msg: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_kind_spelling() {
        let json = serde_yaml::to_string(&EndpointKind::RemoteTcp).unwrap();
        assert_eq!(json.trim(), "REMOTE_TCP");
        let json = serde_yaml::to_string(&EndpointKind::GoogleDrive).unwrap();
        assert_eq!(json.trim(), "GOOGLE_DRIVE");

        let parsed: EndpointKind = serde_yaml::from_str("DROPBOX").unwrap();
        assert_eq!(parsed, EndpointKind::Dropbox);
    }

    #[test]
    fn test_job_status_spelling() {
        assert_eq!(
            serde_yaml::to_string(&JobStatus::Active).unwrap().trim(),
            "ACTIVE"
        );
        assert_eq!(
            serde_yaml::to_string(&SyncOutcome::Failed).unwrap().trim(),
            "FAILED"
        );
    }
}
