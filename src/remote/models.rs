// ABOUTME: Data structures for job queue requests and responses
// ABOUTME: These are serialized to JSON for API communication

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Body of `POST /api/v1/jobs/start`.
#[derive(Debug, Clone, Serialize)]
pub struct StartJobRequest<'a> {
    pub endpoint: &'a str,
    pub payload: &'a Value, // extraction descriptor, passed through untouched
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStarted {
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobStatus {
    pub status: String, // "queued", "running", "completed", "failed", "expired"
    #[serde(default, deserialize_with = "lenient_progress")]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "lenient_message")]
    pub message: Option<String>,
}

/// Accepts `40`, `"40"` or `"40%"`; anything else reads as unknown.
fn lenient_progress<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    })
}

fn lenient_message<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

impl JobStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            progress: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn state(&self) -> JobState {
        JobState::parse(&self.status)
    }
}

/// Job lifecycle as observed through the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    InProgress,
    Completed,
    Failed,
    Expired,
}

impl JobState {
    /// Unrecognized values are treated as still running.
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            "expired" => JobState::Expired,
            _ => JobState::InProgress,
        }
    }
}

/// The result endpoint wraps its payload in `{ "data": ... }`. Bodies without
/// the envelope are returned whole.
pub fn unwrap_result_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}
