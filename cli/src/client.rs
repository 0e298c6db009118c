// Thin HTTP client for a running controller.

use anyhow::{bail, Context, Result};
use serde_json::Value;

pub struct ControllerClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ControllerClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("Controller unreachable at {}", self.base_url))?;
        Self::into_json(response).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Controller unreachable at {}", self.base_url))?;
        Self::into_json(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .delete(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("Controller unreachable at {}", self.base_url))?;
        Self::into_json(response).await
    }

    async fn into_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| Value::String("<no body>".to_string()));
        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("request failed");
            bail!("HTTP {}: {}", status.as_u16(), message);
        }
        Ok(body)
    }
}
