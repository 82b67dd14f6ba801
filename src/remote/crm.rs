// ABOUTME: HTTP client for the CRM action that produces extraction descriptors
// ABOUTME: Authenticates with a static API key passed as a query parameter

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrmError {
    #[error("CRM action is not configured: {0}")]
    NotConfigured(&'static str),

    #[error("CRM request failed: {0}")]
    Transport(String),

    #[error("CRM request timed out")]
    Timeout,

    #[error("CRM responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("CRM response is not valid JSON: {0}")]
    Decode(String),
}

/// Source of extraction descriptors for an external request id.
#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn fetch_descriptor(&self, external_id: &str) -> Result<Value, CrmError>;
}

pub struct CrmClient {
    client: Client,
    function_url: Option<String>,
    api_key: Option<String>,
}

impl CrmClient {
    /// `timeout` is a transport backstop; the orchestrator enforces its own bound.
    pub fn new(
        function_url: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        if function_url.is_none() || api_key.is_none() {
            tracing::warn!("CRM action URL or API key is not configured");
        }

        Ok(Self {
            client,
            function_url,
            api_key,
        })
    }
}

#[async_trait]
impl CrmApi for CrmClient {
    async fn fetch_descriptor(&self, external_id: &str) -> Result<Value, CrmError> {
        let url = self
            .function_url
            .as_deref()
            .ok_or(CrmError::NotConfigured("CRM_FUNCTION_URL"))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CrmError::NotConfigured("CRM_API_KEY"))?;

        let response = self
            .client
            .post(url)
            .query(&[
                ("auth_type", "apikey"),
                ("zapikey", api_key),
                ("request_id", external_id),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CrmError::Timeout
                } else {
                    CrmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CrmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| CrmError::Transport(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| CrmError::Decode(e.to_string()))
    }
}
