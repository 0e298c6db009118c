// Runner Daemon Client - Anti-Corruption Layer for the remote exec agent
//
// Every outbound call to a runner goes through this adapter: health probes,
// streamed command execution, file transfer and self-update triggers. The
// HTTP implementation is reqwest-based; tests substitute a channel-backed
// fake via the `RunnerClient` trait.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::agent::Agent;

/// Normalized request forwarded to the runner's `POST /exec`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: u64,
    pub stream: bool,
}

/// Request forwarded to the runner's `POST /ssh/exec` (flag-gated upstream).
#[derive(Debug, Clone, Serialize)]
pub struct SshExecPayload {
    pub host: String,
    pub user: String,
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bastion: Option<String>,
    pub pty: bool,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileUploadPayload {
    pub path: String,
    #[serde(rename = "contentBase64")]
    pub content_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileDownloadPayload {
    pub path: String,
    #[serde(rename = "contentBase64")]
    pub content_base64: String,
}

impl FileDownloadPayload {
    pub fn decode(&self) -> Result<Vec<u8>, ClientError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.content_base64)
            .map_err(|e| ClientError::Decode(format!("Invalid base64 file body: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePayload {
    pub target: String,
    pub strategy: String,
}

pub type ChunkStream = BoxStream<'static, Result<Bytes, ClientError>>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Agent unreachable: {0}")]
    Unreachable(String),

    #[error("Agent returned HTTP {0}: {1}")]
    Status(u16, String),

    #[error("Failed to decode agent response: {0}")]
    Decode(String),
}

/// Outbound contract with a runner daemon.
#[async_trait]
pub trait RunnerClient: Send + Sync {
    /// Authenticated `GET /health`, bounded by `timeout`.
    async fn health(&self, agent: &Agent, timeout: Duration) -> Result<Value, ClientError>;

    /// Open the streamed `POST /exec` call; chunks arrive as raw bytes and
    /// are parsed by the dispatcher.
    async fn exec_stream(
        &self,
        agent: &Agent,
        payload: ExecPayload,
    ) -> Result<ChunkStream, ClientError>;

    /// Streamed `POST /ssh/exec`.
    async fn ssh_exec_stream(
        &self,
        agent: &Agent,
        payload: SshExecPayload,
    ) -> Result<ChunkStream, ClientError>;

    /// Whole-cycle `POST /files/upload`.
    async fn upload(&self, agent: &Agent, payload: FileUploadPayload) -> Result<(), ClientError>;

    /// Whole-cycle `GET /files/download`.
    async fn download(
        &self,
        agent: &Agent,
        remote_path: &str,
    ) -> Result<FileDownloadPayload, ClientError>;

    /// Advisory `POST /update`; returns the runner's response text.
    async fn trigger_update(
        &self,
        agent: &Agent,
        payload: UpdatePayload,
    ) -> Result<String, ClientError>;
}

pub struct HttpRunnerClient {
    client: reqwest::Client,
}

impl HttpRunnerClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn url(agent: &Agent, path: &str) -> String {
        format!("{}{}", agent.base_url.trim_end_matches('/'), path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status(status, body))
    }
}

impl Default for HttpRunnerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunnerClient for HttpRunnerClient {
    async fn health(&self, agent: &Agent, timeout: Duration) -> Result<Value, ClientError> {
        let response = self
            .client
            .get(Self::url(agent, "/health"))
            .bearer_auth(&agent.token)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;

        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn exec_stream(
        &self,
        agent: &Agent,
        payload: ExecPayload,
    ) -> Result<ChunkStream, ClientError> {
        let response = self
            .client
            .post(Self::url(agent, "/exec"))
            .bearer_auth(&agent.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;

        let response = Self::check_status(response).await?;
        Ok(response
            .bytes_stream()
            .map(|item| item.map_err(|e| ClientError::Unreachable(e.to_string())))
            .boxed())
    }

    async fn ssh_exec_stream(
        &self,
        agent: &Agent,
        payload: SshExecPayload,
    ) -> Result<ChunkStream, ClientError> {
        let response = self
            .client
            .post(Self::url(agent, "/ssh/exec"))
            .bearer_auth(&agent.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;

        let response = Self::check_status(response).await?;
        Ok(response
            .bytes_stream()
            .map(|item| item.map_err(|e| ClientError::Unreachable(e.to_string())))
            .boxed())
    }

    async fn upload(&self, agent: &Agent, payload: FileUploadPayload) -> Result<(), ClientError> {
        let response = self
            .client
            .post(Self::url(agent, "/files/upload"))
            .bearer_auth(&agent.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn download(
        &self,
        agent: &Agent,
        remote_path: &str,
    ) -> Result<FileDownloadPayload, ClientError> {
        let response = self
            .client
            .get(Self::url(agent, "/files/download"))
            .bearer_auth(&agent.token)
            .query(&[("path", remote_path)])
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;

        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn trigger_update(
        &self,
        agent: &Agent,
        payload: UpdatePayload,
    ) -> Result<String, ClientError> {
        let response = self
            .client
            .post(Self::url(agent, "/update"))
            .bearer_auth(&agent.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;

        let response = Self::check_status(response).await?;
        response
            .text()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}
