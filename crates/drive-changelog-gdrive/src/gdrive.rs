//! Google Drive API v3 client wrapper.
//!
//! Stateless apart from the HTTP client: the access token is passed per-call
//! by the caller (TokenManager resolves it). Responses are deserialized into
//! wire structs here and converted to domain records by the callers.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, instrument};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const CHANGE_FIELDS: &str = "nextPageToken,newStartPageToken,\
     changes(changeType,fileId,removed,file(id,name,mimeType,trashed))";
const REVISION_FIELDS: &str = "nextPageToken,revisions(id,mimeType,modifiedTime,exportLinks)";

/// Response of `changes.getStartPageToken`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPageToken {
    start_page_token: Option<String>,
}

/// Response of `changes.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeList {
    #[serde(default)]
    pub changes: Vec<ChangeEntry>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub new_start_page_token: Option<String>,
}

/// One raw entry of `changes.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub file: Option<DriveFile>,
}

/// File resource (subset of fields).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub trashed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionList {
    #[serde(default)]
    revisions: Vec<RevisionEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Revision resource (subset of fields).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionEntry {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub export_links: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Google Drive API client (stateless, token provided per-call).
pub struct GDriveClient {
    http: Client,
    api_base: String,
    upload_base: String,
}

impl GDriveClient {
    /// Client with a per-request timeout.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
        })
    }

    /// Point the client at other endpoints (mock servers).
    pub fn with_base_urls(mut self, api_base: &str, upload_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.upload_base = upload_base.trim_end_matches('/').to_string();
        self
    }

    /// Current position of the change feed.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn get_start_page_token(&self, token: &str) -> anyhow::Result<String> {
        let url = format!("{}/changes/startPageToken", self.api_base);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("supportsAllDrives", "true")])
            .send()
            .await?;
        let resp = ensure_success(resp, "startPageToken").await?;

        let body: StartPageToken = resp.json().await?;
        body.start_page_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Google Drive returned no startPageToken"))
    }

    /// One page of changes since `page_token`, including removals.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn list_changes(&self, token: &str, page_token: &str) -> anyhow::Result<ChangeList> {
        let url = format!("{}/changes", self.api_base);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("pageToken", page_token),
                ("includeRemoved", "true"),
                ("spaces", "drive"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
                ("fields", CHANGE_FIELDS),
            ])
            .send()
            .await?;
        let resp = ensure_success(resp, "changes.list").await?;

        let list: ChangeList = resp.json().await?;
        debug!(
            "Fetched {} change(s) (next page: {}, new start: {})",
            list.changes.len(),
            list.next_page_token.is_some(),
            list.new_start_page_token.is_some()
        );
        Ok(list)
    }

    /// Full revision history of a file, oldest first.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn list_revisions(
        &self,
        token: &str,
        file_id: &str,
    ) -> anyhow::Result<Vec<RevisionEntry>> {
        let url = format!("{}/files/{}/revisions", self.api_base, file_id);
        let mut revisions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(token)
                .query(&[("fields", REVISION_FIELDS), ("pageSize", "200")]);
            if let Some(pt) = &page_token {
                request = request.query(&[("pageToken", pt.as_str())]);
            }

            let resp = ensure_success(request.send().await?, "revisions.list").await?;
            let page: RevisionList = resp.json().await?;
            revisions.extend(page.revisions);

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!("Got {} revision(s) for file {}", revisions.len(), file_id);
        Ok(revisions)
    }

    /// Download the content of one revision.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn download_revision(
        &self,
        token: &str,
        file_id: &str,
        revision_id: &str,
    ) -> anyhow::Result<Vec<u8>> {
        let url = format!(
            "{}/files/{}/revisions/{}",
            self.api_base, file_id, revision_id
        );

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await?;
        let resp = ensure_success(resp, "revision download").await?;

        let bytes = resp.bytes().await?;
        debug!(
            "Downloaded {} bytes for file {} revision {}",
            bytes.len(),
            file_id,
            revision_id
        );
        Ok(bytes.to_vec())
    }

    /// Download from an absolute URL, e.g. a revision export link.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn download_url(&self, token: &str, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self.http.get(url).bearer_auth(token).send().await?;
        let resp = ensure_success(resp, "export").await?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// Find a non-trashed child of `parent_id` by exact name.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn find_child(
        &self,
        token: &str,
        parent_id: &str,
        name: &str,
        mime_type: Option<&str>,
    ) -> anyhow::Result<Option<String>> {
        let url = format!("{}/files", self.api_base);
        let mut q = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query(name),
            escape_query(parent_id)
        );
        if let Some(mime) = mime_type {
            q.push_str(&format!(" and mimeType = '{}'", escape_query(mime)));
        }

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("q", q.as_str()),
                ("fields", "files(id,name)"),
                ("spaces", "drive"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await?;
        let resp = ensure_success(resp, "files.list").await?;

        let list: FileList = resp.json().await?;
        Ok(list.files.into_iter().find_map(|f| f.id))
    }

    /// Create an empty file (or folder) and return its id.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn create_file(
        &self,
        token: &str,
        parent_id: &str,
        name: &str,
        mime_type: &str,
    ) -> anyhow::Result<String> {
        let url = format!("{}/files", self.api_base);
        let body = serde_json::json!({
            "name": name,
            "mimeType": mime_type,
            "parents": [parent_id],
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp, "files.create").await?;

        let created: DriveFile = resp.json().await?;
        let id = created
            .id
            .ok_or_else(|| anyhow::anyhow!("Google Drive files.create returned no id"))?;
        debug!("Created '{}' ({}) in {}", name, id, parent_id);
        Ok(id)
    }

    /// Upload (replace) file content on Google Drive.
    #[instrument(skip(self, token, data), level = "debug", fields(data_len = data.len()))]
    pub async fn update_file(
        &self,
        token: &str,
        file_id: &str,
        data: Vec<u8>,
        mime_type: &str,
    ) -> anyhow::Result<()> {
        let url = format!("{}/files/{}", self.upload_base, file_id);
        let len = data.len();

        let resp = self
            .http
            .patch(&url)
            .bearer_auth(token)
            .query(&[("uploadType", "media"), ("supportsAllDrives", "true")])
            .header("Content-Type", mime_type)
            .body(data)
            .send()
            .await?;
        ensure_success(resp, "upload").await?;

        debug!("Updated file {} ({} bytes)", file_id, len);
        Ok(())
    }
}

async fn ensure_success(resp: Response, what: &str) -> anyhow::Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    anyhow::bail!("Google Drive {} error {}: {}", what, status, body)
}

/// Escape a literal for use inside a single-quoted Drive query string.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
