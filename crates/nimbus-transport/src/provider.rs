//! HttpCloudTransport - ICloudTransport implementation over the REST API
//!
//! Maps the port's operations onto the file service endpoints:
//!
//! | operation        | request                           |
//! |------------------|-----------------------------------|
//! | upload_file      | `PUT /files{path}`                |
//! | download_file    | `GET /files{path}/content`        |
//! | delete_file      | `DELETE /files{path}`             |
//! | delete_folder    | `DELETE /folders{path}`           |
//! | move_item        | `POST /items{path}/move`          |
//! | copy_file        | `POST /files{path}/copy`          |
//! | create_folder    | `POST /folders{path}`             |
//! | list_folder      | `GET /folders{path}/children`     |
//! | get_file_info    | `GET /files{path}`                |
//! | get_folder_info  | `GET /folders{path}`              |
//! | get_changes      | `GET /changes?cursor=...`         |
//!
//! Downloads stream to a `.partial` sibling and rename into place, with
//! the progress callback fed from the byte stream.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use nimbus_core::domain::{ChangeCursor, ContentHash, ItemKind, LocalPath, RemotePath};
use nimbus_core::ports::{ChangeSet, ICloudTransport, ProgressFn, RemoteChange, RemoteItem};

use crate::client::RestClient;

// ============================================================================
// Wire types
// ============================================================================

/// One item as the service represents it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiItem {
    path: String,
    name: String,
    kind: ApiItemKind,
    #[serde(default)]
    size: u64,
    modified_at: DateTime<Utc>,
    hash: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ApiItemKind {
    File,
    Folder,
}

impl ApiItem {
    fn into_remote_item(self) -> Result<RemoteItem> {
        let kind = match self.kind {
            ApiItemKind::File => ItemKind::File,
            ApiItemKind::Folder => ItemKind::Folder,
        };
        let hash = self.hash.map(ContentHash::new).transpose()?;
        Ok(RemoteItem {
            path: RemotePath::new(self.path)?,
            name: self.name,
            kind,
            size_bytes: self.size,
            modified_at: self.modified_at,
            hash,
        })
    }
}

/// `GET /folders{path}/children` response
#[derive(Debug, Deserialize)]
struct ChildrenResponse {
    items: Vec<ApiItem>,
}

/// One entry of the change feed
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiChange {
    item: ApiItem,
    #[serde(default)]
    deleted: bool,
}

/// `GET /changes` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangesResponse {
    changes: Vec<ApiChange>,
    cursor: String,
}

/// Body for move and copy requests
#[derive(Debug, Serialize)]
struct RelocateRequest<'a> {
    to: &'a str,
}

// ============================================================================
// HttpCloudTransport
// ============================================================================

/// Cloud transport backed by the REST file service
pub struct HttpCloudTransport {
    client: RestClient,
}

impl HttpCloudTransport {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    async fn fetch_item(&self, endpoint: &str, remote: &RemotePath) -> Result<RemoteItem> {
        let path = format!("{}{}", endpoint, remote.as_str());
        let item: ApiItem = self
            .client
            .send(Method::GET, &path)
            .await?
            .json()
            .await
            .with_context(|| format!("parse item response for {remote}"))?;
        item.into_remote_item()
    }
}

#[async_trait]
impl ICloudTransport for HttpCloudTransport {
    #[instrument(skip(self, on_progress), fields(local = %local, remote = %remote))]
    async fn upload_file(
        &self,
        local: &LocalPath,
        remote: &RemotePath,
        on_progress: ProgressFn,
    ) -> Result<RemoteItem> {
        let data = tokio::fs::read(local.as_path())
            .await
            .with_context(|| format!("read {local} for upload"))?;
        let total = data.len() as u64;
        on_progress(0, total);

        let path = format!("/files{}", remote.as_str());
        let response = self
            .client
            .execute(self.client.request(Method::PUT, &path).body(data))
            .await?;
        let item: ApiItem = response
            .json()
            .await
            .with_context(|| format!("parse upload response for {remote}"))?;

        on_progress(total, total);
        debug!(bytes = total, "Upload complete");
        item.into_remote_item()
    }

    #[instrument(skip(self, on_progress), fields(remote = %remote, local = %local))]
    async fn download_file(
        &self,
        remote: &RemotePath,
        local: &LocalPath,
        on_progress: ProgressFn,
    ) -> Result<()> {
        let path = format!("/files{}/content", remote.as_str());
        let response = self.client.send(Method::GET, &path).await?;
        let total = response.content_length().unwrap_or(0);

        // Stream into a sibling temp file, then rename into place. The
        // ".partial" suffix keeps it inside the default exclude patterns.
        let target = local.as_path();
        let tmp_path = {
            let mut os = target.as_os_str().to_owned();
            os.push(".partial");
            std::path::PathBuf::from(os)
        };

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("create {}", tmp_path.display()))?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("read download stream")?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("write {}", tmp_path.display()))?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total.max(downloaded));
        }
        file.flush().await.context("flush download")?;
        drop(file);

        tokio::fs::rename(&tmp_path, target)
            .await
            .with_context(|| format!("move download into {local}"))?;
        debug!(bytes = downloaded, "Download complete");
        Ok(())
    }

    #[instrument(skip(self), fields(remote = %remote))]
    async fn delete_file(&self, remote: &RemotePath) -> Result<()> {
        let path = format!("/files{}", remote.as_str());
        self.client.send(Method::DELETE, &path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(remote = %remote))]
    async fn delete_folder(&self, remote: &RemotePath) -> Result<()> {
        let path = format!("/folders{}", remote.as_str());
        self.client.send(Method::DELETE, &path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn move_item(&self, from: &RemotePath, to: &RemotePath) -> Result<()> {
        let path = format!("/items{}/move", from.as_str());
        let body = RelocateRequest { to: to.as_str() };
        self.client
            .execute(self.client.request(Method::POST, &path).json(&body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn copy_file(&self, from: &RemotePath, to: &RemotePath) -> Result<()> {
        let path = format!("/files{}/copy", from.as_str());
        let body = RelocateRequest { to: to.as_str() };
        self.client
            .execute(self.client.request(Method::POST, &path).json(&body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(remote = %remote))]
    async fn create_folder(&self, remote: &RemotePath) -> Result<()> {
        let path = format!("/folders{}", remote.as_str());
        self.client.send(Method::POST, &path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(remote = %remote))]
    async fn list_folder(&self, remote: &RemotePath) -> Result<Vec<RemoteItem>> {
        let path = format!("/folders{}/children", remote.as_str());
        let children: ChildrenResponse = self
            .client
            .send(Method::GET, &path)
            .await?
            .json()
            .await
            .with_context(|| format!("parse children of {remote}"))?;
        children
            .items
            .into_iter()
            .map(ApiItem::into_remote_item)
            .collect()
    }

    #[instrument(skip(self), fields(remote = %remote))]
    async fn get_file_info(&self, remote: &RemotePath) -> Result<RemoteItem> {
        self.fetch_item("/files", remote).await
    }

    #[instrument(skip(self), fields(remote = %remote))]
    async fn get_folder_info(&self, remote: &RemotePath) -> Result<RemoteItem> {
        self.fetch_item("/folders", remote).await
    }

    #[instrument(skip(self), fields(has_cursor = cursor.is_some()))]
    async fn get_changes(&self, cursor: Option<&ChangeCursor>) -> Result<ChangeSet> {
        let mut builder = self.client.request(Method::GET, "/changes");
        if let Some(cursor) = cursor {
            builder = builder.query(&[("cursor", cursor.as_str())]);
        }
        let body: ChangesResponse = self
            .client
            .execute(builder)
            .await?
            .json()
            .await
            .context("parse change feed")?;

        let changes = body
            .changes
            .into_iter()
            .map(|change| {
                Ok(RemoteChange {
                    item: change.item.into_remote_item()?,
                    deleted: change.deleted,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(count = changes.len(), "Change feed fetched");
        Ok(ChangeSet {
            changes,
            next_cursor: ChangeCursor::new(body.cursor)?,
        })
    }
}

// ============================================================================
// Unit tests (wire-format mapping; HTTP flows live in tests/)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_item_mapping() {
        let json = r#"{
            "path": "/docs/a.txt",
            "name": "a.txt",
            "kind": "file",
            "size": 1024,
            "modifiedAt": "2025-06-15T10:30:00Z",
            "hash": "deadbeef"
        }"#;
        let api: ApiItem = serde_json::from_str(json).unwrap();
        let item = api.into_remote_item().unwrap();
        assert_eq!(item.path.as_str(), "/docs/a.txt");
        assert_eq!(item.kind, ItemKind::File);
        assert_eq!(item.size_bytes, 1024);
        assert_eq!(item.hash.unwrap().as_str(), "deadbeef");
    }

    #[test]
    fn test_folder_item_defaults() {
        let json = r#"{
            "path": "/docs",
            "name": "docs",
            "kind": "folder",
            "modifiedAt": "2025-06-15T10:30:00Z"
        }"#;
        let api: ApiItem = serde_json::from_str(json).unwrap();
        let item = api.into_remote_item().unwrap();
        assert_eq!(item.kind, ItemKind::Folder);
        assert_eq!(item.size_bytes, 0);
        assert!(item.hash.is_none());
    }

    #[test]
    fn test_invalid_remote_path_is_rejected() {
        let json = r#"{
            "path": "no-leading-slash",
            "name": "x",
            "kind": "file",
            "modifiedAt": "2025-06-15T10:30:00Z"
        }"#;
        let api: ApiItem = serde_json::from_str(json).unwrap();
        assert!(api.into_remote_item().is_err());
    }

    #[test]
    fn test_change_deleted_flag_defaults_to_false() {
        let json = r#"{
            "item": {
                "path": "/a.txt",
                "name": "a.txt",
                "kind": "file",
                "modifiedAt": "2025-06-15T10:30:00Z"
            }
        }"#;
        let change: ApiChange = serde_json::from_str(json).unwrap();
        assert!(!change.deleted);
    }
}
