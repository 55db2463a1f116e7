//! HTTP client for the remote sandbox provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{CommandOutput, SandboxProvider};
use crate::config::SandboxSettings;
use crate::errors::SandboxError;

/// Sandbox provider reached over its HTTP control API.
pub struct RemoteSandboxProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    /// Domain sandboxes are exposed under, derived from the provider URL.
    preview_domain: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    sandbox_id: String,
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    stdout: String,
    stderr: String,
    #[serde(default)]
    exit_code: i32,
}

impl RemoteSandboxProvider {
    pub fn new(settings: &SandboxSettings) -> Self {
        let base_url = settings.provider_url.trim_end_matches('/').to_string();
        let preview_domain = base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("api.")
            .to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: settings.api_key.clone(),
            preview_domain,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }
}

#[async_trait]
impl SandboxProvider for RemoteSandboxProvider {
    async fn create(&self, template: &str, ttl_secs: u64) -> Result<String, SandboxError> {
        let response = self
            .request(reqwest::Method::POST, "/v1/sandboxes")
            .json(&json!({"template": template, "ttl_secs": ttl_secs}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::CreateFailed(format!("{}: {}", status, body)));
        }

        let parsed: CreateResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::CreateFailed(format!("invalid response: {}", e)))?;
        Ok(parsed.sandbox_id)
    }

    async fn connect(&self, sandbox_id: &str, ttl_secs: u64) -> Result<(), SandboxError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/sandboxes/{}/refresh", sandbox_id),
            )
            .json(&json!({"ttl_secs": ttl_secs}))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::GONE => {
                Err(SandboxError::Unavailable {
                    id: sandbox_id.to_string(),
                })
            }
            status => Err(SandboxError::ExecFailed(format!(
                "refresh returned {}",
                status
            ))),
        }
    }

    async fn write_file(
        &self,
        sandbox_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), SandboxError> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/v1/sandboxes/{}/files", sandbox_id),
            )
            .json(&json!({"path": path, "content": content}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::WriteFailed {
                path: path.to_string(),
                message: format!("{}: {}", status, body),
            });
        }
        Ok(())
    }

    async fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
    ) -> Result<CommandOutput, SandboxError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/sandboxes/{}/exec", sandbox_id),
            )
            .json(&json!({"command": command}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(SandboxError::ExecFailed(format!("exec returned {}", status)));
        }

        let parsed: ExecResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("invalid exec response: {}", e)))?;
        Ok(CommandOutput {
            stdout: parsed.stdout,
            stderr: parsed.stderr,
            exit_code: parsed.exit_code,
        })
    }

    fn host_for_port(&self, sandbox_id: &str, port: u16) -> String {
        format!("https://{}-{}.{}", port, sandbox_id, self.preview_domain)
    }
}
