//! Job lifecycle manager
//!
//! Composes source + pipeline + syncer per job, owns the live-job map, and
//! runs one control loop per job. Receive jobs start a local receive server
//! and delegate a push job to the remote daemon instead.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use color_eyre::eyre::{bail, eyre, Context};
use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use synco_core::pipeline::{debounce, ignore_filter, ChecksumFilter};
use synco_core::vclock::VectorClock;
use synco_core::{Config, Endpoint, EndpointKind, Job, JobSnapshot, JobStatus, SyncResult};
use synco_transport::cloud::auth::TokenFile;
use synco_transport::cloud::dropbox::{
    DropboxClient, DropboxDownloader, DropboxSource, DropboxUploader,
};
use synco_transport::cloud::gdrive::{DriveClient, GDriveDownloader, GDriveSource, GDriveUploader};
use synco_transport::{
    run_syncer, EventSource, LocalSource, LocalSyncer, ReceiveServer, Syncer, TcpSyncer,
};

use crate::state::{ControlChannels, JobState};
use crate::store::{HistoryStore, JobStore};

/// Quiet window applied to local watcher bursts
const DEBOUNCE_DELAY: Duration = Duration::from_millis(100);

/// Poll cadence for the Drive changes feed
const GDRIVE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Owns every running job
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<i64, Arc<JobState>>>>,
    config: Config,
    state_dir: PathBuf,
    node_id: String,
    job_store: Arc<dyn JobStore>,
    history: Arc<dyn HistoryStore>,
    http: reqwest::Client,
}

impl JobManager {
    /// # Errors
    /// Returns an error if the node id cannot be loaded or created
    pub fn new(
        config: Config,
        state_dir: impl Into<PathBuf>,
        job_store: Arc<dyn JobStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Result<Self> {
        let state_dir = state_dir.into();
        let node_id = synco_core::node::load_or_create(&state_dir)?;

        Ok(Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            config,
            state_dir,
            node_id,
            job_store,
            history,
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Start a configured job.
    ///
    /// # Errors
    /// Returns an error if the job is already live, the endpoint pair is
    /// unsupported, or the source/syncer cannot be constructed
    pub async fn start_job(&self, job: &Job) -> Result<()> {
        if self.lock_jobs().contains_key(&job.id) {
            bail!("job {} already running", job.id);
        }

        if job.src_type == EndpointKind::RemoteTcp {
            return self.start_recv_job(job).await;
        }
        self.start_push_job(job).await
    }

    async fn start_push_job(&self, job: &Job) -> Result<()> {
        let buffer = self.config.buffer_size;

        let mut source = self.build_source(job)?;
        let (syncer, local_syncer) = self.build_syncer(job).await?;

        let events = source.start().await?;

        // Only the local watcher needs burst coalescing and content de-dup;
        // cloud feeds already arrive consolidated.
        let tail = if job.src_type == EndpointKind::Local {
            let debounced = debounce(events, DEBOUNCE_DELAY, buffer);
            let filtered = ignore_filter(debounced, &self.config.ignore_list, buffer);
            ChecksumFilter::new().run(filtered, buffer)
        } else {
            ignore_filter(events, &self.config.ignore_list, buffer)
        };

        let results = run_syncer(syncer, tail, buffer);

        let (state, chans) = JobState::new(job, None);
        let state = Arc::new(state);
        self.insert_state(&state, || source.stop())?;

        // Local pairs mirror the whole tree once before relying on events.
        if let Some(local_syncer) = local_syncer {
            let history = Arc::clone(&self.history);
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                match local_syncer.full_sync().await {
                    Ok(results) => {
                        for result in results {
                            if let Err(err) = history.save(&result).await {
                                warn!(%err, "failed to save history");
                            }
                            state.record(&result);
                        }
                    }
                    Err(err) => warn!(%err, "initial full sync failed"),
                }
            });
        }

        self.spawn_control_loop(Arc::clone(&state), chans, Some(results), Some(source));

        info!(id = job.id, src = %job.src_path, dst = %job.dst_path, "push job started");
        Ok(())
    }

    async fn start_recv_job(&self, job: &Job) -> Result<()> {
        let recv_port = match job.recv_port {
            Some(port) => port,
            None => {
                let port = find_available_port()?;
                self.job_store
                    .update_recv_port(job.id, port)
                    .await
                    .wrap_err("failed to save receive port")?;
                port
            }
        };

        let server = ReceiveServer::new(
            &job.dst_path,
            format!("0.0.0.0:{recv_port}"),
            &self.node_id,
            self.config.conflict_strategy,
        )
        .wrap_err("failed to create receive server")?;
        server.start().await.wrap_err("failed to start receive server")?;
        let server = Arc::new(server);

        let my_ip = outbound_ip().wrap_err("failed to determine local IP")?;
        let push_to = format!("{my_ip}:{recv_port}");

        if let Err(err) = self.request_delegation(job, &push_to).await {
            server.stop();
            return Err(err.wrap_err("delegation failed"));
        }

        let (state, chans) = JobState::new(job, Some(Arc::clone(&server)));
        let state = Arc::new(state);
        self.insert_state(&state, || server.stop())?;

        self.spawn_control_loop(Arc::clone(&state), chans, None, None);

        info!(
            id = job.id,
            src = %job.src_path,
            dst = %job.dst_path,
            receive_port = recv_port,
            push_to = %push_to,
            "receive job started"
        );
        Ok(())
    }

    fn build_source(&self, job: &Job) -> Result<Box<dyn EventSource>> {
        let buffer = self.config.buffer_size;

        match (job.src_type, job.dst_type) {
            (EndpointKind::Local, _) => {
                Ok(Box::new(LocalSource::new(&job.src_path, buffer)?))
            }
            (EndpointKind::GoogleDrive, EndpointKind::Local) => {
                let client = DriveClient::new(Arc::new(TokenFile::gdrive(&self.state_dir)));
                Ok(Box::new(GDriveSource::new(
                    client,
                    cloud_path(&job.src_path),
                    &self.state_dir,
                    job.id,
                    GDRIVE_POLL_INTERVAL,
                )))
            }
            (EndpointKind::Dropbox, EndpointKind::Local) => {
                let client = DropboxClient::new(Arc::new(TokenFile::dropbox(&self.state_dir)));
                Ok(Box::new(DropboxSource::new(
                    client,
                    &cloud_path(&job.src_path),
                    &self.state_dir,
                    job.id,
                )))
            }
            (src, dst) => bail!("unsupported sync combination: {src:?} -> {dst:?}"),
        }
    }

    /// Build the destination syncer; local→local also hands back the
    /// concrete syncer so the initial full sync can run
    async fn build_syncer(&self, job: &Job) -> Result<(Arc<dyn Syncer>, Option<Arc<LocalSyncer>>)> {
        match (job.src_type, job.dst_type) {
            (EndpointKind::Local, EndpointKind::Local) => {
                let syncer = Arc::new(LocalSyncer::new(
                    &job.src_path,
                    &job.dst_path,
                    self.config.conflict_strategy,
                )?);
                Ok((Arc::clone(&syncer) as Arc<dyn Syncer>, Some(syncer)))
            }

            (EndpointKind::Local, EndpointKind::RemoteTcp) => {
                let addr = match Endpoint::parse(&job.dst_path) {
                    Endpoint::RemoteTcp { host, .. } => host,
                    _ => job.dst_path.clone(),
                };
                let syncer = TcpSyncer::new(
                    &job.src_path,
                    addr,
                    &self.node_id,
                    Arc::new(VectorClock::new()),
                )?;
                Ok((Arc::new(syncer), None))
            }

            (EndpointKind::Local, EndpointKind::GoogleDrive) => {
                let client = DriveClient::new(Arc::new(TokenFile::gdrive(&self.state_dir)));
                let syncer =
                    GDriveUploader::new(&job.src_path, cloud_path(&job.dst_path), client).await?;
                Ok((Arc::new(syncer), None))
            }

            (EndpointKind::Local, EndpointKind::Dropbox) => {
                let client = DropboxClient::new(Arc::new(TokenFile::dropbox(&self.state_dir)));
                let syncer =
                    DropboxUploader::new(&job.src_path, &cloud_path(&job.dst_path), client).await?;
                Ok((Arc::new(syncer), None))
            }

            (EndpointKind::GoogleDrive, EndpointKind::Local) => {
                let client = DriveClient::new(Arc::new(TokenFile::gdrive(&self.state_dir)));
                let syncer =
                    GDriveDownloader::new(&cloud_path(&job.src_path), &job.dst_path, client).await?;
                Ok((Arc::new(syncer), None))
            }

            (EndpointKind::Dropbox, EndpointKind::Local) => {
                let client = DropboxClient::new(Arc::new(TokenFile::dropbox(&self.state_dir)));
                let syncer =
                    DropboxDownloader::new(&cloud_path(&job.src_path), &job.dst_path, client)?;
                Ok((Arc::new(syncer), None))
            }

            (src, dst) => bail!("unsupported sync combination: {src:?} -> {dst:?}"),
        }
    }

    async fn request_delegation(&self, job: &Job, push_to: &str) -> Result<()> {
        let Endpoint::RemoteTcp { host, path } = Endpoint::parse(&job.src_path) else {
            bail!("src is not a remote endpoint");
        };

        let url = Endpoint::daemon_url(&host, "/jobs/delegate");
        let body = serde_json::json!({
            "src": path,
            "push_to": push_to,
            "node_id": self.node_id,
        });

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .wrap_err_with(|| format!("failed to reach remote daemon at {host}"))?;

        let status = resp.status();
        if status != reqwest::StatusCode::CREATED && status != reqwest::StatusCode::OK {
            let result: HashMap<String, String> = resp.json().await.unwrap_or_default();
            bail!(
                "remote daemon rejected delegation: {}",
                result.get("error").map_or("unknown error", String::as_str)
            );
        }

        info!(remote = %host, src = %path, push_to = %push_to, "delegation accepted");
        Ok(())
    }

    /// # Errors
    /// Returns an error if the job is not live
    pub fn stop_job(&self, id: i64) -> Result<()> {
        let state = self.get_state(id)?;
        let _ = state.stop_tx.try_send(());
        Ok(())
    }

    /// # Errors
    /// Returns an error if the job is not live
    pub fn pause_job(&self, id: i64) -> Result<()> {
        let state = self.get_state(id)?;
        let _ = state.pause_tx.try_send(());
        Ok(())
    }

    /// # Errors
    /// Returns an error if the job is not live
    pub fn resume_job(&self, id: i64) -> Result<()> {
        let state = self.get_state(id)?;
        let _ = state.resume_tx.try_send(());
        Ok(())
    }

    /// Post stop to every live job
    pub fn stop_all(&self) {
        let ids: Vec<i64> = self.lock_jobs().keys().copied().collect();
        for id in ids {
            let _ = self.stop_job(id);
        }
    }

    /// Immutable view of every live job
    #[must_use]
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut snaps: Vec<JobSnapshot> =
            self.lock_jobs().values().map(|s| s.snapshot()).collect();
        snaps.sort_by_key(|s| s.job_id);
        snaps
    }

    fn lock_jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<i64, Arc<JobState>>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn get_state(&self, id: i64) -> Result<Arc<JobState>> {
        self.lock_jobs()
            .get(&id)
            .cloned()
            .ok_or_else(|| eyre!("job {id} not found"))
    }

    /// Insert under the write lock, running `teardown` if the id won
    /// a concurrent start race
    fn insert_state(&self, state: &Arc<JobState>, teardown: impl FnOnce()) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&state.job_id) {
            drop(jobs);
            teardown();
            bail!("job {} already running", state.job_id);
        }
        jobs.insert(state.job_id, Arc::clone(state));
        Ok(())
    }

    fn spawn_control_loop(
        &self,
        state: Arc<JobState>,
        chans: ControlChannels,
        results: Option<mpsc::Receiver<SyncResult>>,
        source: Option<Box<dyn EventSource>>,
    ) {
        let jobs = Arc::clone(&self.jobs);
        let job_store = Arc::clone(&self.job_store);
        let history = Arc::clone(&self.history);

        tokio::spawn(control_loop(
            jobs, job_store, history, state, chans, results, source,
        ));
    }
}

/// Per-job control loop: multiplexes syncer results with pause/resume/stop
/// posts, then tears the job down
async fn control_loop(
    jobs: Arc<RwLock<HashMap<i64, Arc<JobState>>>>,
    job_store: Arc<dyn JobStore>,
    history: Arc<dyn HistoryStore>,
    state: Arc<JobState>,
    mut chans: ControlChannels,
    mut results: Option<mpsc::Receiver<SyncResult>>,
    source: Option<Box<dyn EventSource>>,
) {
    loop {
        tokio::select! {
            result = next_result(&mut results) => match result {
                Some(result) => {
                    // Paused jobs drain results without recording them so the
                    // syncer never backs up behind the loop.
                    if state.status() == JobStatus::Paused {
                        continue;
                    }
                    if let Err(err) = history.save(&result).await {
                        warn!(%err, "failed to save history");
                    }
                    state.record(&result);
                }
                None => break,
            },

            Some(()) = chans.pause_rx.recv() => {
                state.set_status(JobStatus::Paused);
                if let Err(err) = job_store.update_status(state.job_id, JobStatus::Paused).await {
                    warn!(%err, "failed to persist status");
                }
                info!(id = state.job_id, "job paused");
            }

            Some(()) = chans.resume_rx.recv() => {
                state.set_status(JobStatus::Active);
                if let Err(err) = job_store.update_status(state.job_id, JobStatus::Active).await {
                    warn!(%err, "failed to persist status");
                }
                info!(id = state.job_id, "job resumed");
            }

            _ = chans.stop_rx.recv() => break,
        }
    }

    if let Some(source) = &source {
        source.stop();
    }
    if let Some(server) = &state.recv_server {
        server.stop();
    }
    jobs.write()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&state.job_id);

    info!(id = state.job_id, "job stopped");
}

/// Resolve the next result, pending forever when the job has no syncer
/// (receive jobs)
async fn next_result(results: &mut Option<mpsc::Receiver<SyncResult>>) -> Option<SyncResult> {
    match results {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Strip a cloud prefix (`gdrive:`, `dropbox:`) from a stored endpoint path
fn cloud_path(raw: &str) -> String {
    match Endpoint::parse(raw) {
        Endpoint::GoogleDrive { path } | Endpoint::Dropbox { path } => path,
        _ => raw.to_string(),
    }
}

/// Bind-then-close allocation of a free TCP port
fn find_available_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("0.0.0.0:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// The address this host would use to reach the outside; no packet is sent
fn outbound_ip() -> Result<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_path_strips_prefix() {
        assert_eq!(cloud_path("gdrive:/backup"), "/backup");
        assert_eq!(cloud_path("dropbox:/photos"), "/photos");
        assert_eq!(cloud_path("/plain/path"), "/plain/path");
    }

    #[test]
    fn test_find_available_port() {
        let port = find_available_port().unwrap();
        assert!(port > 0);
    }
}
