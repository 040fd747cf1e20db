/// Inference gateway client
///
/// The gateway is a PAI-EAS model-serving endpoint: the assembled prompt is
/// POSTed as the raw request body and the response body is the answer.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EasConfig;
use crate::error::{BotError, Result};

#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Send a prompt and return the raw answer body
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct EasClient {
    url: String,
    token: String,
    http_client: reqwest::Client,
}

impl EasClient {
    pub fn new(config: &EasConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BotError::InferenceRequestFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: config.url.clone(),
            token: config.token.clone(),
            http_client,
        })
    }
}

#[async_trait]
impl InferenceGateway for EasClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self
            .http_client
            .post(&self.url)
            .header("Authorization", &self.token)
            .header("Accept", "*/*")
            .header("Content-Type", "application/x-www-form-urlencoded;charset=utf-8")
            .body(prompt.as_bytes().to_vec())
            .send()
            .await
            .map_err(|e| BotError::InferenceRequestFailed(format!("Failed to send prompt: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BotError::InferenceRequestFailed(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(BotError::InferenceRequestFailed(format!(
                "Gateway error (status {}): {}",
                status, body
            )));
        }

        Ok(body)
    }
}
