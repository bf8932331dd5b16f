//! OS filesystem watcher plumbing
//!
//! Maps `notify` events onto the event model and feeds a bounded channel.
//! When the channel is full the event is dropped with a warning: the
//! watcher's liveness wins over completeness, and the checksum filter
//! recovers correctness on the next change to the same path.

use notify::event::{Event, EventKind as NotifyKind, ModifyKind, RenameMode};
use tokio::sync::mpsc;
use tracing::warn;

use synco_core::{EventKind, FileEvent};

/// Translate one notify event into zero or more file events
pub(crate) fn map_event(event: Event) -> Vec<FileEvent> {
    match event.kind {
        NotifyKind::Create(_) => mapped(event, EventKind::Create),

        NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // Old path reported as a rename, new path as a create.
            let mut paths = event.paths.into_iter();
            let mut out = Vec::new();
            if let Some(from) = paths.next() {
                out.push(FileEvent::new(EventKind::Rename, from));
            }
            if let Some(to) = paths.next() {
                out.push(FileEvent::new(EventKind::Create, to));
            }
            out
        }
        NotifyKind::Modify(ModifyKind::Name(RenameMode::To)) => mapped(event, EventKind::Create),
        NotifyKind::Modify(ModifyKind::Name(_)) => mapped(event, EventKind::Rename),
        NotifyKind::Modify(_) => mapped(event, EventKind::Write),

        NotifyKind::Remove(_) => mapped(event, EventKind::Remove),

        // Access and other op kinds carry no sync-relevant change.
        _ => Vec::new(),
    }
}

fn mapped(event: Event, kind: EventKind) -> Vec<FileEvent> {
    event
        .paths
        .into_iter()
        .map(|path| FileEvent::new(kind, path))
        .collect()
}

/// Forward into the bounded channel, dropping on back-pressure
pub(crate) fn forward(tx: &mpsc::Sender<FileEvent>, event: FileEvent) {
    if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
        warn!(path = %event.path.display(), "event channel is full, dropping event");
    }
}
