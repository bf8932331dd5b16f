//! In-memory state of one running job

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use synco_core::{Job, JobSnapshot, JobStatus, SyncResult};
use synco_transport::ReceiveServer;

/// Live state for a running job.
///
/// Owned by the job manager; counters are mutated from the job's own control
/// loop under the inner mutex. The control channels carry pause/resume/stop
/// posts from the API side into the loop.
pub struct JobState {
    pub job_id: i64,
    pub src: String,
    pub dst: String,
    pub started_at: DateTime<Utc>,
    pub pause_tx: mpsc::Sender<()>,
    pub resume_tx: mpsc::Sender<()>,
    pub stop_tx: mpsc::Sender<()>,
    /// Present only for receive jobs
    pub recv_server: Option<Arc<ReceiveServer>>,
    inner: Mutex<Counters>,
}

struct Counters {
    status: JobStatus,
    synced: u64,
    failed: u64,
    last_sync: Option<DateTime<Utc>>,
}

/// Receiver ends of the control channels, consumed by the control loop
pub struct ControlChannels {
    pub pause_rx: mpsc::Receiver<()>,
    pub resume_rx: mpsc::Receiver<()>,
    pub stop_rx: mpsc::Receiver<()>,
}

impl JobState {
    #[must_use]
    pub fn new(job: &Job, recv_server: Option<Arc<ReceiveServer>>) -> (Self, ControlChannels) {
        let (pause_tx, pause_rx) = mpsc::channel(1);
        let (resume_tx, resume_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let state = Self {
            job_id: job.id,
            src: job.src_path.clone(),
            dst: job.dst_path.clone(),
            started_at: Utc::now(),
            pause_tx,
            resume_tx,
            stop_tx,
            recv_server,
            inner: Mutex::new(Counters {
                status: JobStatus::Active,
                synced: 0,
                failed: 0,
                last_sync: None,
            }),
        };

        (
            state,
            ControlChannels {
                pause_rx,
                resume_rx,
                stop_rx,
            },
        )
    }

    pub fn record(&self, result: &SyncResult) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last_sync = Some(Utc::now());
        if result.is_success() {
            inner.synced += 1;
        } else {
            inner.failed += 1;
        }
    }

    pub fn set_status(&self, status: JobStatus) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).status = status;
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        JobSnapshot {
            job_id: self.job_id,
            src: self.src.clone(),
            dst: self.dst.clone(),
            status: inner.status,
            started_at: self.started_at,
            synced: inner.synced,
            failed: inner.failed,
            last_sync: inner.last_sync,
        }
    }
}
