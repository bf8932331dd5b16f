//! Per-path burst coalescing

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::event::FileEvent;

/// Coalesce bursts of events for the same path.
///
/// Each arrival for a path replaces that path's pending event and restarts
/// its timer; the latest event is emitted once the path has been quiet for
/// `delay`. When the input closes, pending events flush in arbitrary order
/// and the output closes.
pub fn debounce(
    mut input: mpsc::Receiver<FileEvent>,
    delay: Duration,
    buffer: usize,
) -> mpsc::Receiver<FileEvent> {
    let (tx, rx) = mpsc::channel(buffer);

    tokio::spawn(async move {
        let mut pending: HashMap<PathBuf, (Instant, FileEvent)> = HashMap::new();

        loop {
            let next_deadline = pending.values().map(|(at, _)| *at).min();

            tokio::select! {
                received = input.recv() => match received {
                    Some(event) => {
                        pending.insert(event.path.clone(), (Instant::now() + delay, event));
                    }
                    None => break,
                },
                () = fire_at(next_deadline), if next_deadline.is_some() => {
                    let now = Instant::now();
                    let due: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, (at, _))| *at <= now)
                        .map(|(path, _)| path.clone())
                        .collect();

                    for path in due {
                        if let Some((_, event)) = pending.remove(&path) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }

        for (_, (_, event)) in pending.drain() {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });

    rx
}

async fn fire_at(deadline: Option<Instant>) {
    if let Some(at) = deadline {
        sleep_until(at).await;
    }
}
