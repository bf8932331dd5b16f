//! Thin client over the Dropbox HTTP API
//!
//! RPC endpoints live on `api.dropboxapi.com`, content up/downloads on
//! `content.dropboxapi.com`, and the unauthenticated long-poll on
//! `notify.dropboxapi.com`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use color_eyre::eyre::{bail, Context};
use color_eyre::Result;
use serde::Deserialize;
use serde_json::json;

use crate::cloud::auth::AccessTokenProvider;

const API: &str = "https://api.dropboxapi.com/2";
const CONTENT: &str = "https://content.dropboxapi.com/2";
const NOTIFY: &str = "https://notify.dropboxapi.com/2";

/// Server-side long-poll timeout in seconds
pub const LONGPOLL_TIMEOUT_SECS: u64 = 480;

/// One entry of a folder listing page
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
pub enum DropboxEntry {
    File {
        path_display: Option<String>,
    },
    Deleted {
        path_display: Option<String>,
    },
    Folder {
        #[allow(dead_code)]
        path_display: Option<String>,
    },
}

/// One page of `list_folder/continue`
#[derive(Debug, Deserialize)]
pub struct ListFolderPage {
    pub entries: Vec<DropboxEntry>,
    pub cursor: String,
    pub has_more: bool,
}

/// Result of a long-poll round
#[derive(Debug, Deserialize)]
pub struct LongpollResult {
    pub changes: bool,
    pub backoff: Option<u64>,
}

/// Dropbox REST client; cheap to clone
#[derive(Clone)]
pub struct DropboxClient {
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl DropboxClient {
    #[must_use]
    pub fn new(tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
        }
    }

    async fn bearer(&self) -> Result<String> {
        self.tokens.access_token().await
    }

    /// Upload file contents, overwriting any existing revision
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn upload(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let arg = json!({ "path": path, "mode": "overwrite", "autorename": false });

        let resp = self
            .http
            .post(format!("{CONTENT}/files/upload"))
            .bearer_auth(self.bearer().await?)
            .header("Dropbox-API-Arg", arg.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .wrap_err("failed to upload to dropbox")?;

        if !resp.status().is_success() {
            bail!("failed to upload to dropbox: {}", body_text(resp).await);
        }
        Ok(())
    }

    /// Delete a path; an already-deleted path is success
    ///
    /// # Errors
    /// Returns an error for any failure other than `not_found`
    pub async fn delete(&self, path: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{API}/files/delete_v2"))
            .bearer_auth(self.bearer().await?)
            .json(&json!({ "path": path }))
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(());
        }
        let text = body_text(resp).await;
        if text.contains("not_found") {
            return Ok(());
        }
        bail!("failed to delete from dropbox: {text}")
    }

    /// Create a folder; an existing folder is success
    ///
    /// # Errors
    /// Returns an error for any failure other than `conflict`
    pub async fn create_folder(&self, path: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{API}/files/create_folder_v2"))
            .bearer_auth(self.bearer().await?)
            .json(&json!({ "path": path, "autorename": false }))
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(());
        }
        let text = body_text(resp).await;
        if text.contains("conflict") {
            return Ok(());
        }
        bail!("failed to create dropbox folder: {text}")
    }

    /// Download file contents
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn download(&self, path: &str) -> Result<Bytes> {
        let arg = json!({ "path": path });

        let resp = self
            .http
            .post(format!("{CONTENT}/files/download"))
            .bearer_auth(self.bearer().await?)
            .header("Dropbox-API-Arg", arg.to_string())
            .send()
            .await
            .wrap_err("failed to download from dropbox")?;

        if !resp.status().is_success() {
            bail!("failed to download from dropbox: {}", body_text(resp).await);
        }
        Ok(resp.bytes().await?)
    }

    /// Acquire a cursor pointing at the folder's current state
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn get_latest_cursor(&self, folder: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct CursorResult {
            cursor: String,
        }

        let result: CursorResult = self
            .http
            .post(format!("{API}/files/list_folder/get_latest_cursor"))
            .bearer_auth(self.bearer().await?)
            .json(&json!({ "path": folder, "recursive": true }))
            .send()
            .await?
            .error_for_status()
            .wrap_err("failed to get dropbox cursor")?
            .json()
            .await?;
        Ok(result.cursor)
    }

    /// Fetch entries accumulated since `cursor`
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn list_folder_continue(&self, cursor: &str) -> Result<ListFolderPage> {
        let page = self
            .http
            .post(format!("{API}/files/list_folder/continue"))
            .bearer_auth(self.bearer().await?)
            .json(&json!({ "cursor": cursor }))
            .send()
            .await?
            .error_for_status()
            .wrap_err("dropbox list_folder/continue failed")?
            .json()
            .await?;
        Ok(page)
    }

    /// Block until the folder changes or the server-side timeout expires.
    ///
    /// Unauthenticated by design; the cursor itself scopes the watch.
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn longpoll(&self, cursor: &str) -> Result<LongpollResult> {
        let result = self
            .http
            .post(format!("{NOTIFY}/files/list_folder/longpoll"))
            .timeout(Duration::from_secs(LONGPOLL_TIMEOUT_SECS + 30))
            .json(&json!({ "cursor": cursor, "timeout": LONGPOLL_TIMEOUT_SECS }))
            .send()
            .await?
            .error_for_status()
            .wrap_err("dropbox longpoll failed")?
            .json()
            .await?;
        Ok(result)
    }
}

async fn body_text(resp: reqwest::Response) -> String {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if text.is_empty() {
        status.to_string()
    } else {
        text
    }
}
