//! Local filesystem source and syncer

mod source;
mod syncer;
mod watcher;

pub use source::LocalSource;
pub use syncer::LocalSyncer;
