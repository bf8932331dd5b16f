//! Google Drive backend: REST client, change-token source, syncers

mod client;
mod source;
mod syncer;

pub use client::DriveClient;
pub use source::GDriveSource;
pub use syncer::{GDriveDownloader, GDriveUploader};
