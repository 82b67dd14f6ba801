// ABOUTME: Single entry point that resolves an external request id into a normalized dataset
// ABOUTME: CRM descriptor -> job submission -> polling -> normalization, de-duplicated per id

use anyhow::Result;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::Config;
use crate::error::PortalError;
use crate::normalize::{normalize, NormalizedDataset};
use crate::poller::{poll_job, PollOutcome, PollPolicy};
use crate::registry::InFlightRegistry;
use crate::remote::{CrmApi, CrmClient, CrmError, JobApi, JobApiError, JobClient};

pub type Resolution = Result<Arc<NormalizedDataset>, PortalError>;

pub struct Orchestrator {
    pipeline: Pipeline,
    in_flight: InFlightRegistry<Resolution>,
}

/// Everything one orchestration run needs, cheap to clone into the shared future.
#[derive(Clone)]
struct Pipeline {
    crm: Arc<dyn CrmApi>,
    jobs: Arc<dyn JobApi>,
    policy: PollPolicy,
    crm_timeout: Duration,
}

impl Orchestrator {
    pub fn new(crm: Arc<dyn CrmApi>, jobs: Arc<dyn JobApi>) -> Self {
        Self {
            pipeline: Pipeline {
                crm,
                jobs,
                policy: PollPolicy::default(),
                crm_timeout: Duration::from_secs(crate::config::DEFAULT_CRM_TIMEOUT_SECS),
            },
            in_flight: InFlightRegistry::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let crm = CrmClient::new(
            config.crm_function_url.clone(),
            config.crm_api_key.clone(),
            config.crm_timeout + Duration::from_secs(5),
        )?;
        let jobs = JobClient::new(
            config.job_queue_url.clone(),
            config.job_queue_endpoint.clone(),
            config.job_queue_token.clone(),
        )?;
        Ok(Self::new(Arc::new(crm), Arc::new(jobs)).with_crm_timeout(config.crm_timeout))
    }

    pub fn with_crm_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline.crm_timeout = timeout;
        self
    }

    /// Number of orchestrations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.in_flight()
    }

    /// Resolve `external_id` into a dataset.
    ///
    /// Makes exactly one CRM call and one job submission per run. Concurrent
    /// calls for the same id join the running attempt. Dropping the returned
    /// future abandons the call; the run itself stops once no caller is left.
    pub async fn resolve_extraction(&self, external_id: &str) -> Resolution {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(PortalError::InvalidInput);
        }

        let pipeline = self.pipeline.clone();
        let id = external_id.to_string();
        self.in_flight
            .join_or_start(external_id, move || {
                let span = tracing::info_span!("resolve_extraction", external_id = %id);
                pipeline.run(id).instrument(span).boxed()
            })
            .await
    }

    /// Like [`resolve_extraction`](Self::resolve_extraction), but gives up with
    /// [`PortalError::Cancelled`] as soon as `cancel` fires.
    pub async fn resolve_with_cancel(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> Resolution {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(external_id, "Extraction request cancelled");
                Err(PortalError::Cancelled)
            }
            resolution = self.resolve_extraction(external_id) => resolution,
        }
    }
}

impl Pipeline {
    async fn run(self, external_id: String) -> Resolution {
        let descriptor = self.fetch_descriptor(&external_id).await?;

        let job_id = self.jobs.start_job(&descriptor).await.map_err(|err| {
            tracing::error!(error = %err, "Failed to start extraction job");
            match err {
                JobApiError::MissingCredential => PortalError::Configuration(err.to_string()),
                other => PortalError::JobSubmissionFailed(other.to_string()),
            }
        })?;

        let report = poll_job(self.jobs.as_ref(), &job_id, &self.policy).await;
        tracing::debug!(job_id, attempts = report.attempts.len(), "Polling finished");
        let payload = outcome_to_payload(report.outcome)?;

        let dataset = normalize(&payload).inspect_err(|err| {
            tracing::error!(job_id, error = %err, "Extraction result could not be normalized");
        })?;

        tracing::info!(
            job_id,
            tabs = dataset.tabs.len(),
            rows = dataset.row_count(),
            "Extraction resolved"
        );
        Ok(Arc::new(dataset))
    }

    async fn fetch_descriptor(&self, external_id: &str) -> Result<Value, PortalError> {
        let timeout_secs = self.crm_timeout.as_secs();
        let fetched = tokio::time::timeout(self.crm_timeout, self.crm.fetch_descriptor(external_id))
            .await
            .unwrap_or(Err(CrmError::Timeout));

        fetched.map_err(|err| {
            tracing::warn!(error = %err, "CRM action failed");
            match err {
                CrmError::NotConfigured(_) => PortalError::Configuration(err.to_string()),
                CrmError::Timeout => PortalError::UpstreamTimeout(timeout_secs),
                CrmError::Status { status, .. } => PortalError::UpstreamRejected { status },
                CrmError::Transport(msg) => PortalError::UpstreamUnavailable(msg),
                CrmError::Decode(msg) => {
                    PortalError::UpstreamUnavailable(format!("unparseable response: {}", msg))
                }
            }
        })
    }
}

fn outcome_to_payload(outcome: PollOutcome) -> Result<Value, PortalError> {
    match outcome {
        PollOutcome::Completed(payload) => Ok(payload),
        PollOutcome::Failed { message } => Err(PortalError::JobFailed(
            message.unwrap_or_else(|| "Unknown error".to_string()),
        )),
        PollOutcome::Expired => Err(PortalError::JobExpired),
        PollOutcome::TimedOut { attempts } => Err(PortalError::JobTimedOut { attempts }),
        PollOutcome::ErrorLimitExceeded { errors, last_error } => {
            Err(PortalError::JobPollErrorLimitExceeded {
                errors,
                last_error: last_error.to_string(),
            })
        }
        PollOutcome::Rejected(err) => Err(match err {
            JobApiError::NotFound => PortalError::JobNotFound,
            JobApiError::Unauthorized(status) => PortalError::JobAuthFailed { status },
            JobApiError::MalformedId => PortalError::JobMalformedId,
            JobApiError::MissingCredential => PortalError::Configuration(err.to_string()),
            other => PortalError::Internal(other.to_string()),
        }),
    }
}
