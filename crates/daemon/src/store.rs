//! Store contracts for jobs and history
//!
//! The durable backend is an external collaborator; the daemon only depends
//! on these traits. [`MemoryStore`] is the in-process implementation used by
//! default and in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::eyre::eyre;
use color_eyre::Result;

use synco_core::{EndpointKind, HistoryRecord, Job, JobStatus, SyncOutcome, SyncResult};

/// Persisted job registry
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    async fn add(
        &self,
        src_type: EndpointKind,
        src_path: &str,
        dst_type: EndpointKind,
        dst_path: &str,
    ) -> Result<Job>;

    async fn get_all(&self) -> Result<Vec<Job>>;

    async fn get(&self, id: i64) -> Result<Option<Job>>;

    async fn update_status(&self, id: i64, status: JobStatus) -> Result<()>;

    async fn update_recv_port(&self, id: i64, port: u16) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<()>;
}

/// Aggregate history counters
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct HistoryStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
}

/// Durable record of sync attempts
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    async fn save(&self, result: &SyncResult) -> Result<()>;

    /// Most recent records first
    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>>;

    async fn stats(&self) -> Result<HistoryStats>;
}

/// In-memory store backing both contracts
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<i64, Job>>,
    history: RwLock<Vec<HistoryRecord>>,
    next_job_id: AtomicI64,
    next_history_id: AtomicI64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_job_id: AtomicI64::new(1),
            next_history_id: AtomicI64::new(1),
            ..Self::default()
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn add(
        &self,
        src_type: EndpointKind,
        src_path: &str,
        dst_type: EndpointKind,
        dst_path: &str,
    ) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: self.next_job_id.fetch_add(1, Ordering::Relaxed),
            src_type,
            src_path: src_path.to_string(),
            dst_type,
            dst_path: dst_path.to_string(),
            status: JobStatus::Active,
            recv_port: None,
            created_at: now,
            updated_at: now,
        };

        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_all(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn get(&self, id: i64) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn update_status(&self, id: i64, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let job = jobs.get_mut(&id).ok_or_else(|| eyre!("job {id} not found"))?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn update_recv_port(&self, id: i64, port: u16) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let job = jobs.get_mut(&id).ok_or_else(|| eyre!("job {id} not found"))?;
        job.recv_port = Some(port);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn save(&self, result: &SyncResult) -> Result<()> {
        let record = HistoryRecord {
            id: self.next_history_id.fetch_add(1, Ordering::Relaxed),
            event_type: if result.is_success() {
                SyncOutcome::Success
            } else {
                SyncOutcome::Failed
            },
            src_path: result.src_path.clone(),
            dst_path: result.dst_path.clone(),
            file_event: result.event.kind.as_str().to_string(),
            err_msg: result.err.clone(),
            synced_at: Utc::now(),
        };

        self.history
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        Ok(history.iter().rev().take(limit).cloned().collect())
    }

    async fn stats(&self) -> Result<HistoryStats> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        let total = history.len() as u64;
        let success = history
            .iter()
            .filter(|r| r.event_type == SyncOutcome::Success)
            .count() as u64;
        Ok(HistoryStats {
            total,
            success,
            failed: total - success,
        })
    }
}
