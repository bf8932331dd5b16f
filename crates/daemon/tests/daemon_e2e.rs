//! Manager-level end-to-end: pipeline, mirror, pause semantics

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use synco_core::{Config, EndpointKind, SyncOutcome};
use synco_daemon::{HistoryStore, JobManager, JobStore, MemoryStore};

struct Harness {
    _state_dir: TempDir,
    store: Arc<MemoryStore>,
    manager: JobManager,
}

fn harness() -> Harness {
    let state_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let manager = JobManager::new(
        Config::default(),
        state_dir.path(),
        store.clone(),
        store.clone(),
    )
    .unwrap();

    Harness {
        _state_dir: state_dir,
        store,
        manager,
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached within 10s");
}

#[tokio::test]
async fn test_existing_files_are_mirrored_on_start() {
    let h = harness();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();

    tokio::fs::write(src.path().join("a.txt"), "hi").await.unwrap();
    tokio::fs::write(src.path().join("b.txt"), "bye").await.unwrap();

    let job = h
        .store
        .add(
            EndpointKind::Local,
            &src.path().to_string_lossy(),
            EndpointKind::Local,
            &dst.path().to_string_lossy(),
        )
        .await
        .unwrap();
    h.manager.start_job(&job).await.unwrap();

    let a = dst.path().join("a.txt");
    let b = dst.path().join("b.txt");
    wait_for(|| a.exists() && b.exists()).await;

    assert_eq!(tokio::fs::read_to_string(&a).await.unwrap(), "hi");
    assert_eq!(tokio::fs::read_to_string(&b).await.unwrap(), "bye");

    // History lands just after the files do.
    let mut history = Vec::new();
    for _ in 0..50 {
        history = h.store.recent(10).await.unwrap();
        if history.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.event_type == SyncOutcome::Success));

    h.manager.stop_job(job.id).unwrap();
}

#[tokio::test]
async fn test_burst_of_identical_writes_yields_one_history_row() {
    let h = harness();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();

    let job = h
        .store
        .add(
            EndpointKind::Local,
            &src.path().to_string_lossy(),
            EndpointKind::Local,
            &dst.path().to_string_lossy(),
        )
        .await
        .unwrap();
    h.manager.start_job(&job).await.unwrap();

    // Let the watcher settle before generating the burst.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let file = src.path().join("burst.txt");
    for _ in 0..10 {
        tokio::fs::write(&file, "same content").await.unwrap();
    }

    let mirrored = dst.path().join("burst.txt");
    wait_for(|| mirrored.exists()).await;
    // Allow any stragglers through the pipeline.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let history = h.store.recent(100).await.unwrap();
    let rows: Vec<_> = history
        .iter()
        .filter(|r| r.src_path.ends_with("burst.txt"))
        .collect();
    assert_eq!(rows.len(), 1, "debounce + checksum collapse the burst");

    h.manager.stop_job(job.id).unwrap();
}

#[tokio::test]
async fn test_duplicate_start_rejected() {
    let h = harness();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();

    let job = h
        .store
        .add(
            EndpointKind::Local,
            &src.path().to_string_lossy(),
            EndpointKind::Local,
            &dst.path().to_string_lossy(),
        )
        .await
        .unwrap();

    h.manager.start_job(&job).await.unwrap();
    let err = h.manager.start_job(&job).await.unwrap_err();
    assert!(err.to_string().contains("already running"));

    h.manager.stop_job(job.id).unwrap();
}

#[tokio::test]
async fn test_unsupported_pair_fails_start() {
    let h = harness();

    let job = h
        .store
        .add(
            EndpointKind::GoogleDrive,
            "/backup",
            EndpointKind::Dropbox,
            "/photos",
        )
        .await
        .unwrap();

    let err = h.manager.start_job(&job).await.unwrap_err();
    assert!(err.to_string().contains("unsupported sync combination"));
    assert!(h.manager.snapshots().is_empty());
}

#[tokio::test]
async fn test_missing_source_directory_fails_start() {
    let h = harness();

    let job = h
        .store
        .add(
            EndpointKind::Local,
            "/definitely/not/here",
            EndpointKind::Local,
            "/tmp/out",
        )
        .await
        .unwrap();

    let err = h.manager.start_job(&job).await.unwrap_err();
    assert!(err.to_string().contains("source directory not found"));
}

#[tokio::test]
async fn test_paused_job_drains_but_does_not_record() {
    let h = harness();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();

    let job = h
        .store
        .add(
            EndpointKind::Local,
            &src.path().to_string_lossy(),
            EndpointKind::Local,
            &dst.path().to_string_lossy(),
        )
        .await
        .unwrap();
    h.manager.start_job(&job).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    h.manager.pause_job(job.id).unwrap();
    wait_for(|| {
        h.manager
            .snapshots()
            .first()
            .is_some_and(|s| s.status == synco_core::JobStatus::Paused)
    })
    .await;

    // The syncer still applies the event; only history/counters are gated.
    tokio::fs::write(src.path().join("while-paused.txt"), "x")
        .await
        .unwrap();
    let mirrored = dst.path().join("while-paused.txt");
    wait_for(|| mirrored.exists()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let history = h.store.recent(100).await.unwrap();
    assert!(
        !history.iter().any(|r| r.src_path.ends_with("while-paused.txt")),
        "paused results are discarded from history"
    );

    h.manager.resume_job(job.id).unwrap();
    wait_for(|| {
        h.manager
            .snapshots()
            .first()
            .is_some_and(|s| s.status == synco_core::JobStatus::Active)
    })
    .await;

    tokio::fs::write(src.path().join("after-resume.txt"), "y")
        .await
        .unwrap();
    wait_for(|| dst.path().join("after-resume.txt").exists()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let history = h.store.recent(100).await.unwrap();
    assert!(history.iter().any(|r| r.src_path.ends_with("after-resume.txt")));

    h.manager.stop_job(job.id).unwrap();
}

#[tokio::test]
async fn test_stop_removes_job_from_snapshots() {
    let h = harness();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();

    let job = h
        .store
        .add(
            EndpointKind::Local,
            &src.path().to_string_lossy(),
            EndpointKind::Local,
            &dst.path().to_string_lossy(),
        )
        .await
        .unwrap();
    h.manager.start_job(&job).await.unwrap();
    assert_eq!(h.manager.snapshots().len(), 1);

    h.manager.stop_job(job.id).unwrap();
    wait_for(|| h.manager.snapshots().is_empty()).await;

    assert!(h.manager.stop_job(job.id).is_err(), "stopped job is gone");
}
