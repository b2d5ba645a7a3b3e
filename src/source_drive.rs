//! Google Drive folder source.
//!
//! Talks to the Drive v3 REST API with a bearer token read from the
//! environment. Listing asks for exactly the fields the watcher diffs on;
//! fetch downloads file media. Auth and quota rejections come back as
//! permanent errors so the caller does not retry them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::DriveSourceConfig;
use crate::errors::PipelineError;
use crate::models::{FetchedDocument, SourceEntry};
use crate::source::DocumentSource;

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";

pub struct DriveSource {
    http: reqwest::Client,
    folder_id: String,
    token: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
    #[serde(rename = "modifiedTime")]
    modified_time: DateTime<Utc>,
}

impl DriveSource {
    pub fn new(config: &DriveSourceConfig) -> Result<Self, PipelineError> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            PipelineError::Permanent(format!("{} environment variable not set", config.token_env))
        })?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            folder_id: config.folder_id.clone(),
            token,
            base_url: DRIVE_API.to_string(),
        })
    }

    /// Point at a different endpoint; test hook.
    #[doc(hidden)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl DocumentSource for DriveSource {
    fn name(&self) -> &str {
        "drive"
    }

    async fn list(&self) -> Result<Vec<SourceEntry>, PipelineError> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/files", self.base_url))
                .bearer_auth(&self.token)
                .query(&[
                    ("q", format!("'{}' in parents", self.folder_id)),
                    (
                        "fields",
                        "nextPageToken, files(id, name, mimeType, modifiedTime)".to_string(),
                    ),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(PipelineError::from_status(status, "drive list"));
            }
            let page: FileList = response
                .json()
                .await
                .map_err(|e| PipelineError::Transient(format!("drive list decode: {e}")))?;

            entries.extend(page.files.into_iter().map(|f| SourceEntry {
                id: f.id,
                name: f.name,
                mime_type: f.mime_type,
                modified: f.modified_time,
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(entries)
    }

    async fn fetch(&self, id: &str) -> Result<FetchedDocument, PipelineError> {
        let response = self
            .http
            .get(format!("{}/files/{id}", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status, "drive fetch"));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = response.bytes().await?.to_vec();
        Ok(FetchedDocument { bytes, mime_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn source(server: &MockServer) -> DriveSource {
        DriveSource {
            http: reqwest::Client::new(),
            folder_id: "folder1".to_string(),
            token: "test-token".to_string(),
            base_url: server.base_url(),
        }
    }

    #[tokio::test]
    async fn list_parses_drive_fields() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/files")
                .header("authorization", "Bearer test-token");
            then.status(200).json_body(serde_json::json!({
                "files": [{
                    "id": "f1",
                    "name": "Q4-sales.csv",
                    "mimeType": "text/csv",
                    "modifiedTime": "2025-01-15T10:00:00Z"
                }]
            }));
        });

        let entries = source(&server).list().await.unwrap();
        mock.assert();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "f1");
        assert_eq!(entries[0].mime_type, "text/csv");
    }

    #[tokio::test]
    async fn fetch_downloads_media() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/files/f1").query_param("alt", "media");
            then.status(200)
                .header("content-type", "text/csv; charset=utf-8")
                .body("region,revenue\nEMEA,120\n");
        });

        let doc = source(&server).fetch("f1").await.unwrap();
        assert_eq!(doc.mime_type, "text/csv");
        assert!(doc.bytes.starts_with(b"region"));
    }

    #[tokio::test]
    async fn auth_failure_is_permanent() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/files");
            then.status(401);
        });

        let err = source(&server).list().await.unwrap_err();
        assert!(matches!(err, PipelineError::Permanent(_)));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/files");
            then.status(503);
        });

        let err = source(&server).list().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
