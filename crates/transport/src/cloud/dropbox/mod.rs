//! Dropbox backend: REST client, long-poll source, syncers

mod client;
mod source;
mod syncer;

pub use client::DropboxClient;
pub use source::DropboxSource;
pub use syncer::{DropboxDownloader, DropboxUploader};

/// Normalize a Dropbox folder path: single leading slash, no trailing slash
#[must_use]
pub fn normalize_path(path: &str) -> String {
    format!("/{}", path.replace('\\', "/").trim_matches('/'))
}
