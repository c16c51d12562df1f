// ABOUTME: HTTP client for the managed cloud sandbox API
// ABOUTME: Thin reqwest wrapper mapping API error bodies onto sandbox errors

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SandboxError};

const API_KEY_HEADER: &str = "X-API-Key";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct CreateSandboxRequest<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    metadata: &'a HashMap<String, String>,
    /// Lifetime in seconds
    timeout: u64,
}

/// Sandbox as reported by the API
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSandbox {
    #[serde(rename = "sandboxID")]
    pub sandbox_id: String,
    #[serde(rename = "templateID", default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(rename = "startedAt", default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl RemoteSandbox {
    pub fn is_running(&self) -> bool {
        self.state.as_deref().map_or(true, |s| s == "running")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest<'a> {
    cmd: &'a str,
    cwd: &'a str,
    background: bool,
    timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Cloud sandbox API client
#[derive(Clone)]
pub struct CloudApi {
    http_client: Client,
    base_url: Url,
    api_key: String,
}

impl CloudApi {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            SandboxError::Config(format!("Invalid cloud API URL '{}': {}", base_url, e))
        })?;
        let http_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            api_key: api_key.into(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SandboxError::Config(format!("Cloud API URL {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Turn a non-success response into an error
    ///
    /// `sandbox_not_found` becomes `NotFound` carrying the remote id, which the
    /// provider translates into its own id after pruning the registry.
    async fn error_from(response: reqwest::Response, remote_id: Option<&str>, path: Option<&str>) -> SandboxError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();

        match (body.code.as_deref(), remote_id, path) {
            (Some("sandbox_not_found"), Some(id), _) => SandboxError::NotFound(id.to_string()),
            (Some("file_not_found"), _, Some(path)) => SandboxError::FileNotFound(path.to_string()),
            _ if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
                SandboxError::Unavailable(format!(
                    "Cloud API rejected the API key ({}). Check REELBOX_CLOUD_API_KEY.",
                    status.as_u16()
                ))
            }
            _ => SandboxError::Api {
                status: status.as_u16(),
                message: body
                    .message
                    .unwrap_or_else(|| if text.is_empty() { status.to_string() } else { text }),
            },
        }
    }

    pub async fn health(&self) -> Result<bool> {
        let response = self
            .http_client
            .get(self.url(&["health"])?)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    pub async fn create_sandbox(
        &self,
        template_id: &str,
        metadata: &HashMap<String, String>,
        lifetime: Duration,
    ) -> Result<RemoteSandbox> {
        debug!(template_id, "POST /sandboxes");
        let response = self
            .http_client
            .post(self.url(&["sandboxes"])?)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&CreateSandboxRequest {
                template_id,
                metadata,
                timeout: lifetime.as_secs(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, None, None).await);
        }
        Ok(response.json().await?)
    }

    /// Sandboxes whose metadata matches every pair in `filter`
    pub async fn list_sandboxes(&self, filter: &[(&str, &str)]) -> Result<Vec<RemoteSandbox>> {
        let metadata = filter
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        debug!(metadata = %metadata, "GET /sandboxes");

        let response = self
            .http_client
            .get(self.url(&["sandboxes"])?)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("metadata", metadata.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, None, None).await);
        }
        Ok(response.json().await?)
    }

    /// Kill a sandbox; `false` when it was already gone
    pub async fn kill_sandbox(&self, remote_id: &str) -> Result<bool> {
        debug!(remote_id, "DELETE /sandboxes/{{id}}");
        let response = self
            .http_client
            .delete(self.url(&["sandboxes", remote_id])?)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response, Some(remote_id), None).await);
        }
        Ok(true)
    }

    pub async fn run_command(
        &self,
        remote_id: &str,
        cmd: &str,
        cwd: &str,
        background: bool,
        timeout: Duration,
    ) -> Result<CommandResponse> {
        let response = self
            .http_client
            .post(self.url(&["sandboxes", remote_id, "commands"])?)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&CommandRequest {
                cmd,
                cwd,
                background,
                timeout_ms: timeout.as_millis() as u64,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, Some(remote_id), None).await);
        }
        Ok(response.json().await?)
    }

    pub async fn read_file(&self, remote_id: &str, path: &str) -> Result<Vec<u8>> {
        let response = self
            .http_client
            .get(self.url(&["sandboxes", remote_id, "files"])?)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("path", path)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, Some(remote_id), Some(path)).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Upload raw bytes; parent directories are created by the service
    pub async fn write_file(&self, remote_id: &str, path: &str, content: &[u8]) -> Result<()> {
        let response = self
            .http_client
            .post(self.url(&["sandboxes", remote_id, "files"])?)
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .query(&[("path", path)])
            .body(content.to_vec())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, Some(remote_id), Some(path)).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_segments_are_escaped() {
        let api = CloudApi::new("https://api.example.com/v1/", "key").unwrap();
        let url = api.url(&["sandboxes", "a b/c", "files"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/sandboxes/a%20b%2Fc/files");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            CloudApi::new("not a url", "key"),
            Err(SandboxError::Config(_))
        ));
    }

    #[test]
    fn test_remote_sandbox_defaults() {
        let remote: RemoteSandbox =
            serde_json::from_str(r#"{"sandboxID":"abc","metadata":{"projectId":"p"}}"#).unwrap();
        assert!(remote.is_running());
        assert_eq!(remote.metadata.get("projectId").map(String::as_str), Some("p"));

        let paused: RemoteSandbox =
            serde_json::from_str(r#"{"sandboxID":"abc","state":"paused"}"#).unwrap();
        assert!(!paused.is_running());
    }
}
