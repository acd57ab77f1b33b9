//! `ArchiveSink` that copies the changelog into a Drive folder.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use drive_changelog_core::{ArchiveSink, PublishReceipt, SyncError};
use tracing::{debug, info, instrument};

use crate::config::PublishMode;
use crate::gdrive::{GDriveClient, FOLDER_MIME_TYPE};
use crate::token_manager::TokenManager;

const CHANGELOG_MIME_TYPE: &str = "application/x-ndjson";

pub struct DriveArchiveSink {
    client: Arc<GDriveClient>,
    token_manager: Arc<TokenManager>,
    parent_folder_id: String,
    folder_name: String,
    mode: PublishMode,
}

impl DriveArchiveSink {
    pub fn new(
        client: Arc<GDriveClient>,
        token_manager: Arc<TokenManager>,
        parent_folder_id: String,
        folder_name: String,
        mode: PublishMode,
    ) -> Self {
        Self {
            client,
            token_manager,
            parent_folder_id,
            folder_name,
            mode,
        }
    }

    async fn find_or_create(
        &self,
        token: &str,
        parent_id: &str,
        name: &str,
        mime_type: &str,
    ) -> anyhow::Result<String> {
        let filter = (mime_type == FOLDER_MIME_TYPE).then_some(mime_type);
        if let Some(id) = self.client.find_child(token, parent_id, name, filter).await? {
            debug!("Reusing '{}' ({})", name, id);
            return Ok(id);
        }
        info!("Creating '{}' in {}", name, parent_id);
        self.client.create_file(token, parent_id, name, mime_type).await
    }

    async fn upload(&self, log_path: &Path) -> anyhow::Result<PublishReceipt> {
        let data = tokio::fs::read(log_path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read changelog {}: {}", log_path.display(), e)
        })?;
        let bytes = data.len() as u64;

        let token = self.token_manager.get_valid_token().await?;
        let folder_id = self
            .find_or_create(&token, &self.parent_folder_id, &self.folder_name, FOLDER_MIME_TYPE)
            .await?;

        let file_name = log_file_name(log_path);
        let file_id = match self.mode {
            PublishMode::Replace => {
                self.find_or_create(&token, &folder_id, &file_name, CHANGELOG_MIME_TYPE)
                    .await?
            }
            PublishMode::Snapshot => {
                let name = snapshot_name(&file_name, chrono::Utc::now());
                self.client
                    .create_file(&token, &folder_id, &name, CHANGELOG_MIME_TYPE)
                    .await?
            }
        };

        self.client
            .update_file(&token, &file_id, data, CHANGELOG_MIME_TYPE)
            .await?;

        Ok(PublishReceipt {
            remote_id: file_id,
            bytes,
        })
    }
}

fn log_file_name(log_path: &Path) -> String {
    log_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "changelog.jsonl".to_string())
}

/// `changelog.jsonl` → `changelog-20240101T120000Z.jsonl`
fn snapshot_name(file_name: &str, at: chrono::DateTime<chrono::Utc>) -> String {
    let stamp = at.format("%Y%m%dT%H%M%SZ");
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}-{}.{}", stem, stamp, ext),
        None => format!("{}-{}", file_name, stamp),
    }
}

#[async_trait]
impl ArchiveSink for DriveArchiveSink {
    #[instrument(skip(self), level = "debug")]
    async fn publish(&self, log_path: &Path) -> Result<PublishReceipt, SyncError> {
        self.upload(log_path)
            .await
            .map_err(|e| SyncError::Archive(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_manager::{AuthorizedUserCredentials, Credentials};
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{body_bytes, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn sink(server: &MockServer, mode: PublishMode) -> DriveArchiveSink {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .mount(server)
            .await;

        let tokens = TokenManager::new(
            Credentials::AuthorizedUser(AuthorizedUserCredentials {
                client_id: "c".into(),
                client_secret: "s".into(),
                refresh_token: "r".into(),
                token_uri: format!("{}/token", server.uri()),
            }),
            Duration::from_secs(5),
        )
        .unwrap();
        let client = GDriveClient::new(Duration::from_secs(5))
            .unwrap()
            .with_base_urls(&server.uri(), &format!("{}/upload", server.uri()));

        DriveArchiveSink::new(
            Arc::new(client),
            Arc::new(tokens),
            "root".into(),
            "changelog".into(),
            mode,
        )
    }

    async fn write_log(dir: &TempDir) -> std::path::PathBuf {
        let log_path = dir.path().join("changelog.jsonl");
        tokio::fs::write(&log_path, b"{\"itemId\":\"a\"}\n").await.unwrap();
        log_path
    }

    #[test]
    fn test_snapshot_name() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            snapshot_name("changelog.jsonl", at),
            "changelog-20240309T070501Z.jsonl"
        );
        assert_eq!(snapshot_name("log", at), "log-20240309T070501Z");
    }

    #[tokio::test]
    async fn test_replace_reuses_existing_folder_and_file() {
        let server = MockServer::start().await;
        let sink = sink(&server, PublishMode::Replace).await;
        let dir = TempDir::new().unwrap();
        let log_path = write_log(&dir).await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param(
                "q",
                "name = 'changelog' and 'root' in parents and trashed = false \
                 and mimeType = 'application/vnd.google-apps.folder'",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"id": "folder-1", "name": "changelog"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param(
                "q",
                "name = 'changelog.jsonl' and 'folder-1' in parents and trashed = false",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"id": "file-1", "name": "changelog.jsonl"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/upload/files/file-1"))
            .and(body_bytes(b"{\"itemId\":\"a\"}\n".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(2)
            .mount(&server)
            .await;

        for _ in 0..2 {
            let receipt = sink.publish(&log_path).await.unwrap();
            assert_eq!(receipt.remote_id, "file-1");
            assert_eq!(receipt.bytes, 15);
        }
    }

    #[tokio::test]
    async fn test_replace_creates_missing_folder_and_file() {
        let server = MockServer::start().await;
        let sink = sink(&server, PublishMode::Replace).await;
        let dir = TempDir::new().unwrap();
        let log_path = write_log(&dir).await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"files": []})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(body_partial_json(serde_json::json!({
                "name": "changelog",
                "mimeType": "application/vnd.google-apps.folder",
                "parents": ["root"]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "new-folder"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(body_partial_json(serde_json::json!({
                "name": "changelog.jsonl",
                "parents": ["new-folder"]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "new-file"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/upload/files/new-file"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = sink.publish(&log_path).await.unwrap();
        assert_eq!(receipt.remote_id, "new-file");
    }

    #[tokio::test]
    async fn test_snapshot_creates_new_file_each_time() {
        let server = MockServer::start().await;
        let sink = sink(&server, PublishMode::Snapshot).await;
        let dir = TempDir::new().unwrap();
        let log_path = write_log(&dir).await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"id": "folder-1"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(body_partial_json(serde_json::json!({"parents": ["folder-1"]})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "snap"})),
            )
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/upload/files/snap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(2)
            .mount(&server)
            .await;

        sink.publish(&log_path).await.unwrap();
        sink.publish(&log_path).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let names: Vec<String> = requests
            .iter()
            .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/files")
            .map(|r| {
                let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
                body["name"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.starts_with("changelog-") && n.ends_with(".jsonl")));
    }

    #[tokio::test]
    async fn test_upload_failure_is_archive_error() {
        let server = MockServer::start().await;
        let sink = sink(&server, PublishMode::Replace).await;
        let dir = TempDir::new().unwrap();
        let log_path = write_log(&dir).await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let result = sink.publish(&log_path).await;
        assert!(matches!(result, Err(SyncError::Archive(_))));
    }
}
