// ABOUTME: Service configuration from an optional TOML file and the environment
// ABOUTME: Environment variables override file values, which override built-in defaults

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_JOB_QUEUE_URL: &str = "http://localhost:8000";
pub const DEFAULT_JOB_QUEUE_ENDPOINT: &str = "/api/v1/extract/multi-sheet";
pub const DEFAULT_CRM_TIMEOUT_SECS: u64 = 30;

/// Shape of the TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind_addr: Option<String>,
    crm_function_url: Option<String>,
    crm_api_key: Option<String>,
    crm_timeout_secs: Option<u64>,
    job_queue_url: Option<String>,
    job_queue_token: Option<String>,
    job_queue_endpoint: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub crm_function_url: Option<String>,
    pub crm_api_key: Option<String>,
    pub crm_timeout: Duration,
    pub job_queue_url: String,
    pub job_queue_token: Option<String>,
    pub job_queue_endpoint: String,
}

impl Config {
    /// Load `.env` (if present), then the optional TOML file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let file = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let crm_timeout_secs = match var("CRM_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse()
                .context("CRM_TIMEOUT_SECS must be a whole number of seconds")?,
            None => file.crm_timeout_secs.unwrap_or(DEFAULT_CRM_TIMEOUT_SECS),
        };
        anyhow::ensure!(crm_timeout_secs > 0, "CRM timeout must be at least one second");

        Ok(Self {
            bind_addr: var("PORTAL_BIND_ADDR")
                .or(file.bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            crm_function_url: var("CRM_FUNCTION_URL").or(file.crm_function_url),
            crm_api_key: var("CRM_API_KEY").or(file.crm_api_key),
            crm_timeout: Duration::from_secs(crm_timeout_secs),
            job_queue_url: var("JOB_QUEUE_URL")
                .or(file.job_queue_url)
                .unwrap_or_else(|| DEFAULT_JOB_QUEUE_URL.to_string()),
            job_queue_token: var("JOB_QUEUE_TOKEN").or(file.job_queue_token),
            job_queue_endpoint: var("JOB_QUEUE_ENDPOINT")
                .or(file.job_queue_endpoint)
                .unwrap_or_else(|| DEFAULT_JOB_QUEUE_ENDPOINT.to_string()),
        })
    }

    /// Missing credentials only fail at call time; say so at startup.
    pub fn warn_missing(&self) {
        if self.job_queue_token.is_none() {
            tracing::warn!("JOB_QUEUE_TOKEN is not set; every extraction request will fail");
        }
        if self.crm_function_url.is_none() || self.crm_api_key.is_none() {
            tracing::warn!("CRM_FUNCTION_URL or CRM_API_KEY is not set; every extraction request will fail");
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("crm_function_url", &self.crm_function_url)
            .field("crm_api_key", &redact(&self.crm_api_key))
            .field("crm_timeout", &self.crm_timeout)
            .field("job_queue_url", &self.job_queue_url)
            .field("job_queue_token", &redact(&self.job_queue_token))
            .field("job_queue_endpoint", &self.job_queue_endpoint)
            .finish()
    }
}
