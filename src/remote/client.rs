// ABOUTME: HTTP client for the background extraction job queue
// ABOUTME: Handles job submission, status checks, result retrieval, and error classification

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::models::{unwrap_result_envelope, JobStarted, JobStatus, StartJobRequest};

/// Failure of a single job queue call.
///
/// Classification is by status code only; response bodies are kept for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobApiError {
    #[error("job queue bearer token is not configured")]
    MissingCredential,

    #[error("job not found")]
    NotFound,

    #[error("job queue rejected credentials with status {0}")]
    Unauthorized(u16),

    #[error("job queue rejected the job id as malformed")]
    MalformedId,

    #[error("job queue client error {status}: {body}")]
    Client { status: u16, body: String },

    #[error("job queue server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("job queue request failed: {0}")]
    Transport(String),

    #[error("invalid job queue response: {0}")]
    Decode(String),
}

impl JobApiError {
    /// Status-check failures that polling must not retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobApiError::MissingCredential
                | JobApiError::NotFound
                | JobApiError::Unauthorized(_)
                | JobApiError::MalformedId
        )
    }

    /// HTTP status attached to the failure, if the server answered at all.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            JobApiError::NotFound => Some(404),
            JobApiError::Unauthorized(status) => Some(*status),
            JobApiError::MalformedId => Some(400),
            JobApiError::Client { status, .. } | JobApiError::Server { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// The three calls needed to run one extraction job.
///
/// None of them is idempotent: every `start_job` creates a new job.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn start_job(&self, descriptor: &Value) -> Result<String, JobApiError>;

    async fn get_status(&self, job_id: &str) -> Result<JobStatus, JobApiError>;

    /// Only meaningful once the status endpoint reported `completed`.
    async fn get_result(&self, job_id: &str) -> Result<Value, JobApiError>;
}

pub struct JobClient {
    client: Client,
    api_base_url: String,
    endpoint: String,
    token: Option<String>,
}

impl JobClient {
    pub fn new(api_base_url: String, endpoint: String, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let token = token.filter(|t| !t.trim().is_empty());
        if token.is_none() {
            tracing::warn!("Job queue token is not configured; extraction requests will fail");
        }

        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            endpoint,
            token,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, JobApiError> {
        let token = self.token.as_deref().ok_or(JobApiError::MissingCredential)?;
        Ok(request.bearer_auth(token))
    }

    fn job_url(&self, job_id: &str, action: &str) -> String {
        format!("{}/api/v1/jobs/{}/{}", self.api_base_url, job_id, action)
    }
}

#[async_trait]
impl JobApi for JobClient {
    async fn start_job(&self, descriptor: &Value) -> Result<String, JobApiError> {
        let url = format!("{}/api/v1/jobs/start", self.api_base_url);
        let body = StartJobRequest {
            endpoint: &self.endpoint,
            payload: descriptor,
        };

        let response = self
            .authorized(self.client.post(&url))?
            .json(&body)
            .send()
            .await
            .map_err(|e| JobApiError::Transport(e.to_string()))?;

        let response = error_for_status(response).await?;
        let started: JobStarted = response
            .json()
            .await
            .map_err(|e| JobApiError::Decode(e.to_string()))?;

        tracing::info!(job_id = %started.job_id, "Extraction job submitted");
        Ok(started.job_id)
    }

    async fn get_status(&self, job_id: &str) -> Result<JobStatus, JobApiError> {
        let url = self.job_url(job_id, "status");

        let response = self
            .authorized(self.client.get(&url))?
            .send()
            .await
            .map_err(|e| JobApiError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            404 => return Err(JobApiError::NotFound),
            status @ (401 | 403) => return Err(JobApiError::Unauthorized(status)),
            400 => return Err(JobApiError::MalformedId),
            _ => {}
        }

        let response = error_for_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| JobApiError::Decode(e.to_string()))
    }

    async fn get_result(&self, job_id: &str) -> Result<Value, JobApiError> {
        let url = self.job_url(job_id, "result");

        let response = self
            .authorized(self.client.get(&url))?
            .send()
            .await
            .map_err(|e| JobApiError::Transport(e.to_string()))?;

        let response = error_for_status(response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| JobApiError::Decode(e.to_string()))?;

        Ok(unwrap_result_envelope(body))
    }
}

/// Splits non-2xx responses into client (4xx) and server (everything else) errors.
async fn error_for_status(response: Response) -> Result<Response, JobApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        Err(JobApiError::Client { status: code, body })
    } else {
        Err(JobApiError::Server { status: code, body })
    }
}
