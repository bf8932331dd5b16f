//! Thin client over the Drive v3 REST surface

use std::sync::Arc;

use bytes::Bytes;
use color_eyre::eyre::{bail, Context};
use color_eyre::Result;
use serde::Deserialize;
use serde_json::json;

use crate::cloud::auth::AccessTokenProvider;

const API: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";

/// Drive's folder pseudo-MIME type
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// File metadata subset used by the sync paths
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// One entry of a changes page
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveChange {
    pub file_id: String,
    #[serde(default)]
    pub removed: bool,
    pub file: Option<DriveFile>,
}

/// One page of the changes feed
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePage {
    #[serde(default)]
    pub changes: Vec<DriveChange>,
    pub next_page_token: Option<String>,
    pub new_start_page_token: Option<String>,
}

/// Google Drive REST client; cheap to clone
#[derive(Clone)]
pub struct DriveClient {
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl DriveClient {
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

    async fn list(&self, q: &str) -> Result<Vec<DriveFile>> {
        let resp = self
            .http
            .get(format!("{API}/files"))
            .bearer_auth(self.bearer().await?)
            .query(&[("q", q), ("fields", "files(id, name, mimeType, parents)")])
            .send()
            .await
            .wrap_err("drive list request failed")?
            .error_for_status()
            .wrap_err("drive list rejected")?;

        let list: FileList = resp.json().await?;
        Ok(list.files)
    }

    /// Find a folder by name under a parent
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        let q = format!(
            "name='{}' and '{}' in parents and mimeType='{FOLDER_MIME}' and trashed=false",
            escape_name(name),
            parent_id,
        );
        Ok(self.list(&q).await?.into_iter().next().map(|f| f.id))
    }

    /// Find a non-folder file by name under a parent
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn find_file(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        let q = format!(
            "name='{}' and '{}' in parents and mimeType!='{FOLDER_MIME}' and trashed=false",
            escape_name(name),
            parent_id,
        );
        Ok(self.list(&q).await?.into_iter().next().map(|f| f.id))
    }

    /// List folder ids directly under a parent
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn list_subfolders(&self, parent_id: &str) -> Result<Vec<String>> {
        let q = format!("'{parent_id}' in parents and mimeType='{FOLDER_MIME}' and trashed=false");
        Ok(self.list(&q).await?.into_iter().map(|f| f.id).collect())
    }

    /// Create a folder, returning its id
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let file: DriveFile = self
            .http
            .post(format!("{API}/files"))
            .bearer_auth(self.bearer().await?)
            .query(&[("fields", "id")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME,
                "parents": [parent_id],
            }))
            .send()
            .await?
            .error_for_status()
            .wrap_err_with(|| format!("failed to create folder {name}"))?
            .json()
            .await?;
        Ok(file.id)
    }

    /// Walk `path` segment by segment from the Drive root, creating missing
    /// folders; returns the final folder id
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn ensure_folder_path(&self, path: &str) -> Result<String> {
        let mut parent_id = "root".to_string();
        for segment in split_path(path) {
            parent_id = match self.find_folder(segment, &parent_id).await? {
                Some(id) => id,
                None => self.create_folder(segment, &parent_id).await?,
            };
        }
        Ok(parent_id)
    }

    /// Create an empty file entry, returning its id
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn create_file(&self, name: &str, parent_id: &str) -> Result<String> {
        let file: DriveFile = self
            .http
            .post(format!("{API}/files"))
            .bearer_auth(self.bearer().await?)
            .query(&[("fields", "id")])
            .json(&json!({ "name": name, "parents": [parent_id] }))
            .send()
            .await?
            .error_for_status()
            .wrap_err_with(|| format!("failed to create file {name}"))?
            .json()
            .await?;
        Ok(file.id)
    }

    /// Replace a file's content
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn upload_media(&self, file_id: &str, data: Vec<u8>) -> Result<()> {
        self.http
            .patch(format!("{UPLOAD_API}/files/{file_id}"))
            .bearer_auth(self.bearer().await?)
            .query(&[("uploadType", "media")])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?
            .error_for_status()
            .wrap_err("failed to upload file content")?;
        Ok(())
    }

    /// Download a file's content
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn download(&self, file_id: &str) -> Result<Bytes> {
        let resp = self
            .http
            .get(format!("{API}/files/{file_id}"))
            .bearer_auth(self.bearer().await?)
            .query(&[("alt", "media")])
            .send()
            .await?
            .error_for_status()
            .wrap_err("failed to download")?;
        Ok(resp.bytes().await?)
    }

    /// Delete a file; an already-deleted file is success
    ///
    /// # Errors
    /// Returns an error on any failure other than 404
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{API}/files/{file_id}"))
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND || resp.status().is_success() {
            return Ok(());
        }
        bail!("failed to delete drive file: {}", resp.status())
    }

    /// Fetch a file's metadata
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn get_file(&self, file_id: &str) -> Result<DriveFile> {
        let file = self
            .http
            .get(format!("{API}/files/{file_id}"))
            .bearer_auth(self.bearer().await?)
            .query(&[("fields", "id, name, parents")])
            .send()
            .await?
            .error_for_status()
            .wrap_err("failed to get file metadata")?
            .json()
            .await?;
        Ok(file)
    }

    /// Acquire a fresh changes-feed page token
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn start_page_token(&self) -> Result<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StartToken {
            start_page_token: String,
        }

        let token: StartToken = self
            .http
            .get(format!("{API}/changes/startPageToken"))
            .bearer_auth(self.bearer().await?)
            .send()
            .await?
            .error_for_status()
            .wrap_err("failed to get start page token")?
            .json()
            .await?;
        Ok(token.start_page_token)
    }

    /// Fetch one page of the changes feed
    ///
    /// # Errors
    /// Returns an error on a failed API call
    pub async fn list_changes(&self, page_token: &str) -> Result<ChangePage> {
        let page = self
            .http
            .get(format!("{API}/changes"))
            .bearer_auth(self.bearer().await?)
            .query(&[
                ("pageToken", page_token),
                (
                    "fields",
                    "nextPageToken, newStartPageToken, \
                     changes(fileId, removed, file(id, name, parents, mimeType))",
                ),
            ])
            .send()
            .await?
            .error_for_status()
            .wrap_err("failed to list changes")?
            .json()
            .await?;
        Ok(page)
    }
}

fn escape_name(name: &str) -> String {
    name.replace('\'', "\\'")
}

/// Split a Drive folder path into its non-empty segments
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty())
}
