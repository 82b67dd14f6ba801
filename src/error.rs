// ABOUTME: Error taxonomy for resolving client extraction data
// ABOUTME: Maps every failure to a stable HTTP status and a user-facing message

use thiserror::Error;

/// Every way a `resolve_extraction` call can end without a dataset.
///
/// The type is `Clone` because a single outcome is handed to every caller
/// that joined the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalError {
    #[error("Missing required parameter: id")]
    InvalidInput,

    #[error("CRM request failed: {0}")]
    UpstreamUnavailable(String),

    #[error("CRM request timed out after {0}s")]
    UpstreamTimeout(u64),

    #[error("CRM rejected request with status {status}")]
    UpstreamRejected { status: u16 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Job submission failed: {0}")]
    JobSubmissionFailed(String),

    #[error("Job not found or expired")]
    JobNotFound,

    #[error("Job queue authentication failed with status {status}")]
    JobAuthFailed { status: u16 },

    #[error("Job queue rejected the job id as malformed")]
    JobMalformedId,

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Job expired")]
    JobExpired,

    #[error("Job did not finish after {attempts} status checks")]
    JobTimedOut { attempts: u32 },

    #[error("Job status polling gave up after {errors} consecutive errors: {last_error}")]
    JobPollErrorLimitExceeded { errors: u32, last_error: String },

    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortalError {
    /// HTTP status code returned to the UI layer.
    pub fn status_code(&self) -> u16 {
        match self {
            PortalError::InvalidInput => 400,
            PortalError::UpstreamRejected { status: 404 } => 404,
            PortalError::UpstreamRejected { .. } => 400,
            PortalError::UpstreamTimeout(_) => 408,
            PortalError::UpstreamUnavailable(_) => 500,
            PortalError::Configuration(_) => 500,
            PortalError::JobSubmissionFailed(_) => 500,
            PortalError::JobNotFound => 404,
            PortalError::JobAuthFailed { status } => *status,
            PortalError::JobMalformedId => 400,
            PortalError::JobFailed(_) => 500,
            PortalError::JobExpired => 408,
            PortalError::JobTimedOut { .. } => 408,
            PortalError::JobPollErrorLimitExceeded { .. } => 500,
            PortalError::Normalization(_) => 500,
            PortalError::Cancelled => 500,
            PortalError::Internal(_) => 500,
        }
    }

    /// Message safe to show to the end user. Never carries transport or
    /// configuration detail.
    pub fn public_message(&self) -> String {
        match self {
            PortalError::InvalidInput => "Missing required parameter: id".to_string(),
            PortalError::UpstreamRejected { status } => crm_status_message(*status).to_string(),
            PortalError::UpstreamTimeout(_) => {
                "Timed out while retrieving extraction parameters".to_string()
            }
            PortalError::UpstreamUnavailable(_) => {
                "Failed to retrieve extraction parameters".to_string()
            }
            PortalError::JobSubmissionFailed(_) => "Failed to start extraction job".to_string(),
            PortalError::JobNotFound => "Extraction job not found or expired".to_string(),
            PortalError::JobAuthFailed { .. } => {
                "Not authorized to access the extraction service".to_string()
            }
            PortalError::JobMalformedId => "Invalid extraction job id".to_string(),
            PortalError::JobFailed(message) => format!("Extraction job failed: {}", message),
            PortalError::JobExpired => "Extraction job expired".to_string(),
            PortalError::JobTimedOut { .. } => {
                "Extraction is taking longer than expected, please try again".to_string()
            }
            PortalError::JobPollErrorLimitExceeded { .. } => {
                "Extraction service is unavailable, please try again".to_string()
            }
            PortalError::Cancelled => "Request cancelled".to_string(),
            PortalError::Configuration(_)
            | PortalError::Normalization(_)
            | PortalError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Errors whose detail must stay in the logs.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            PortalError::Configuration(_)
                | PortalError::Normalization(_)
                | PortalError::Internal(_)
                | PortalError::UpstreamUnavailable(_)
                | PortalError::JobSubmissionFailed(_)
        )
    }
}

/// User-facing message for a non-2xx CRM response.
pub fn crm_status_message(status: u16) -> &'static str {
    match status {
        400 => "Invalid request parameters",
        404 => "Request not found",
        405 => "Method not allowed",
        500 => "Internal server error",
        _ => "Failed to retrieve client data",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crm_not_found_passes_through() {
        let err = PortalError::UpstreamRejected { status: 404 };
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.public_message(), "Request not found");
    }

    #[test]
    fn test_other_crm_statuses_become_bad_request() {
        let err = PortalError::UpstreamRejected { status: 500 };
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.public_message(), "Internal server error");

        let err = PortalError::UpstreamRejected { status: 418 };
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.public_message(), "Failed to retrieve client data");
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = PortalError::Configuration("JOB_QUEUE_TOKEN is not set".to_string());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.public_message(), "Internal server error");
        assert!(err.is_internal());
    }

    #[test]
    fn test_job_terminal_states_have_distinct_statuses() {
        assert_eq!(PortalError::JobNotFound.status_code(), 404);
        assert_eq!(PortalError::JobAuthFailed { status: 403 }.status_code(), 403);
        assert_eq!(PortalError::JobMalformedId.status_code(), 400);
        assert_eq!(PortalError::JobExpired.status_code(), 408);
        assert_eq!(PortalError::JobTimedOut { attempts: 150 }.status_code(), 408);
        assert_eq!(
            PortalError::JobFailed("sheet missing".to_string()).public_message(),
            "Extraction job failed: sheet missing"
        );
    }
}
