// ABOUTME: Drives a submitted extraction job to a terminal state
// ABOUTME: Fixed-interval polling with bounded retries and exponential backoff on transient errors

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::remote::{JobApi, JobApiError, JobState};

/// Polling limits. `Default` is the service policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub max_consecutive_errors: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 150,
            interval: Duration::from_millis(2000),
            max_consecutive_errors: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(5000),
        }
    }
}

impl PollPolicy {
    /// Delay before retrying after the `consecutive_errors`-th transient failure in a row.
    pub fn backoff(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(1u32 << exponent);
        delay.min(self.backoff_cap)
    }
}

/// Terminal state of one polling run.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(Value),
    Failed { message: Option<String> },
    Expired,
    TimedOut { attempts: u32 },
    ErrorLimitExceeded { errors: u32, last_error: JobApiError },
    /// The status endpoint answered with a non-retryable error.
    Rejected(JobApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Ok,
    Retryable,
    Fatal,
}

/// Record of one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollAttempt {
    pub attempt: u32,
    pub result: AttemptResult,
    pub http_status: Option<u16>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub outcome: PollOutcome,
    pub attempts: Vec<PollAttempt>,
}

enum Step {
    Pending,
    Terminal(PollOutcome),
    Transient(JobApiError),
}

/// Poll `job_id` until it reaches a terminal state.
///
/// The poller only reads job state. Every iteration counts as an attempt,
/// whatever its outcome.
pub async fn poll_job(api: &dyn JobApi, job_id: &str, policy: &PollPolicy) -> PollReport {
    let started = Instant::now();
    let mut attempts = Vec::new();
    let mut attempt: u32 = 0;
    let mut consecutive_errors: u32 = 0;

    while attempt < policy.max_attempts {
        attempt += 1;

        let step = check_once(api, job_id).await;
        let (result, http_status) = match &step {
            Step::Pending => (AttemptResult::Ok, None),
            Step::Terminal(PollOutcome::Rejected(err)) => {
                (AttemptResult::Fatal, err.http_status())
            }
            Step::Terminal(_) => (AttemptResult::Ok, None),
            Step::Transient(err) => (AttemptResult::Retryable, err.http_status()),
        };
        attempts.push(PollAttempt {
            attempt,
            result,
            http_status,
            elapsed: started.elapsed(),
        });

        let delay = match step {
            Step::Terminal(outcome) => {
                log_terminal(job_id, attempt, &outcome);
                return PollReport { outcome, attempts };
            }
            Step::Pending => {
                consecutive_errors = 0;
                policy.interval
            }
            Step::Transient(err) => {
                consecutive_errors += 1;
                tracing::warn!(
                    job_id,
                    attempt,
                    consecutive_errors,
                    error = %err,
                    "Transient error while polling job"
                );
                if consecutive_errors >= policy.max_consecutive_errors {
                    let outcome = PollOutcome::ErrorLimitExceeded {
                        errors: consecutive_errors,
                        last_error: err,
                    };
                    log_terminal(job_id, attempt, &outcome);
                    return PollReport { outcome, attempts };
                }
                policy.backoff(consecutive_errors)
            }
        };

        if attempt < policy.max_attempts {
            tokio::time::sleep(delay).await;
        }
    }

    let outcome = PollOutcome::TimedOut { attempts: attempt };
    log_terminal(job_id, attempt, &outcome);
    PollReport { outcome, attempts }
}

async fn check_once(api: &dyn JobApi, job_id: &str) -> Step {
    let status = match api.get_status(job_id).await {
        Ok(status) => status,
        Err(err) if err.is_terminal() => return Step::Terminal(PollOutcome::Rejected(err)),
        Err(err) => return Step::Transient(err),
    };

    match status.state() {
        JobState::Completed => match api.get_result(job_id).await {
            Ok(result) => Step::Terminal(PollOutcome::Completed(result)),
            // Counts against the same budget as a failed status call.
            Err(err) => Step::Transient(err),
        },
        JobState::Failed => Step::Terminal(PollOutcome::Failed {
            message: status.message,
        }),
        JobState::Expired => Step::Terminal(PollOutcome::Expired),
        JobState::InProgress => {
            tracing::debug!(
                job_id,
                status = %status.status,
                progress = ?status.progress,
                "Job still in progress"
            );
            Step::Pending
        }
    }
}

fn log_terminal(job_id: &str, attempt: u32, outcome: &PollOutcome) {
    match outcome {
        PollOutcome::Completed(_) => tracing::info!(job_id, attempt, "Job completed"),
        other => tracing::info!(job_id, attempt, outcome = ?other, "Job polling ended"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::remote::JobStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Job queue fake that replays scripted status responses and records call times.
    #[derive(Default)]
    pub(crate) struct ScriptedJobs {
        statuses: Mutex<VecDeque<Result<JobStatus, JobApiError>>>,
        fallback_status: Mutex<Option<Result<JobStatus, JobApiError>>>,
        results: Mutex<VecDeque<Result<Value, JobApiError>>>,
        start_error: Mutex<Option<JobApiError>>,
        pub(crate) start_calls: Mutex<u32>,
        pub(crate) status_calls: Mutex<Vec<Instant>>,
        pub(crate) result_calls: Mutex<u32>,
    }

    impl ScriptedJobs {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn then_status(self, status: Result<JobStatus, JobApiError>) -> Self {
            self.statuses.lock().unwrap().push_back(status);
            self
        }

        /// Returned once the scripted statuses run out.
        pub(crate) fn always(self, status: Result<JobStatus, JobApiError>) -> Self {
            *self.fallback_status.lock().unwrap() = Some(status);
            self
        }

        pub(crate) fn then_result(self, result: Result<Value, JobApiError>) -> Self {
            self.results.lock().unwrap().push_back(result);
            self
        }

        pub(crate) fn failing_start(self, error: JobApiError) -> Self {
            *self.start_error.lock().unwrap() = Some(error);
            self
        }

        pub(crate) fn status_call_count(&self) -> usize {
            self.status_calls.lock().unwrap().len()
        }

        /// Gaps between consecutive status calls.
        pub(crate) fn gaps(&self) -> Vec<Duration> {
            let calls = self.status_calls.lock().unwrap();
            calls.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl JobApi for ScriptedJobs {
        async fn start_job(&self, _descriptor: &Value) -> Result<String, JobApiError> {
            *self.start_calls.lock().unwrap() += 1;
            match self.start_error.lock().unwrap().clone() {
                Some(error) => Err(error),
                None => Ok("job-1".to_string()),
            }
        }

        async fn get_status(&self, _job_id: &str) -> Result<JobStatus, JobApiError> {
            self.status_calls.lock().unwrap().push(Instant::now());
            let next = self.statuses.lock().unwrap().pop_front();
            match next {
                Some(status) => status,
                None => self
                    .fallback_status
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Ok(JobStatus::new("running"))),
            }
        }

        async fn get_result(&self, _job_id: &str) -> Result<Value, JobApiError> {
            *self.result_calls.lock().unwrap() += 1;
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({"tabs": []})))
        }
    }

    fn server_error() -> JobApiError {
        JobApiError::Server {
            status: 503,
            body: String::new(),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = PollPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4000));
        assert_eq!(policy.backoff(4), Duration::from_millis(5000));
        assert_eq!(policy.backoff(40), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_stops_after_one_attempt() {
        let jobs = ScriptedJobs::new().always(Err(JobApiError::NotFound));
        let started = Instant::now();

        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;

        assert_eq!(report.outcome, PollOutcome::Rejected(JobApiError::NotFound));
        assert_eq!(jobs.status_call_count(), 1);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.attempts[0].result, AttemptResult::Fatal);
        assert_eq!(report.attempts[0].http_status, Some(404));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_hit_limit_with_backoff() {
        let jobs = ScriptedJobs::new().always(Err(server_error()));

        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;

        assert!(matches!(
            report.outcome,
            PollOutcome::ErrorLimitExceeded { errors: 3, .. }
        ));
        assert_eq!(jobs.status_call_count(), 3);
        assert_eq!(
            jobs.gaps(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert!(report
            .attempts
            .iter()
            .all(|a| a.result == AttemptResult::Retryable && a.http_status == Some(503)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_on_fifth_attempt() {
        let mut jobs = ScriptedJobs::new();
        for _ in 0..4 {
            jobs = jobs.then_status(Ok(JobStatus::new("running")));
        }
        let jobs = jobs
            .then_status(Ok(JobStatus::new("completed")))
            .then_result(Ok(json!({"tabs": [{"sheet_name": "TM"}]})));

        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;

        assert_eq!(
            report.outcome,
            PollOutcome::Completed(json!({"tabs": [{"sheet_name": "TM"}]}))
        );
        assert_eq!(jobs.status_call_count(), 5);
        assert_eq!(jobs.gaps(), vec![Duration::from_millis(2000); 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_numeric_progress_keeps_polling() {
        let running: JobStatus =
            serde_json::from_value(json!({"status": "running", "progress": "45%"})).unwrap();
        let mut jobs = ScriptedJobs::new();
        for _ in 0..5 {
            jobs = jobs.then_status(Ok(running.clone()));
        }
        let jobs = jobs.then_status(Ok(JobStatus::new("completed")));

        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;

        assert_eq!(report.outcome, PollOutcome::Completed(json!({"tabs": []})));
        assert_eq!(jobs.status_call_count(), 6);
        assert_eq!(jobs.gaps(), vec![Duration::from_millis(2000); 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_error_counter() {
        let jobs = ScriptedJobs::new()
            .then_status(Err(server_error()))
            .then_status(Err(JobApiError::Transport("reset".to_string())))
            .then_status(Ok(JobStatus::new("queued")))
            .then_status(Err(server_error()))
            .then_status(Err(server_error()))
            .then_status(Ok(JobStatus::new("completed")));

        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;

        assert!(matches!(report.outcome, PollOutcome::Completed(_)));
        assert_eq!(jobs.status_call_count(), 6);
        assert_eq!(
            jobs.gaps(),
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(2000),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_fetch_failure_is_retried() {
        let jobs = ScriptedJobs::new()
            .always(Ok(JobStatus::new("completed")))
            .then_result(Err(server_error()))
            .then_result(Ok(json!({"tabs": []})));

        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;

        assert_eq!(report.outcome, PollOutcome::Completed(json!({"tabs": []})));
        assert_eq!(jobs.status_call_count(), 2);
        assert_eq!(*jobs.result_calls.lock().unwrap(), 2);
        assert_eq!(jobs.gaps(), vec![Duration::from_millis(1000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_fetch_failures_exhaust_budget() {
        let jobs = ScriptedJobs::new()
            .always(Ok(JobStatus::new("completed")))
            .then_result(Err(server_error()))
            .then_result(Err(server_error()))
            .then_result(Err(server_error()));

        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;

        assert!(matches!(
            report.outcome,
            PollOutcome::ErrorLimitExceeded { errors: 3, .. }
        ));
        assert_eq!(*jobs.result_calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_and_expired_are_terminal() {
        let jobs = ScriptedJobs::new()
            .then_status(Ok(JobStatus::new("failed").with_message("sheet not found")));
        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;
        assert_eq!(
            report.outcome,
            PollOutcome::Failed {
                message: Some("sheet not found".to_string())
            }
        );

        let jobs = ScriptedJobs::new().then_status(Ok(JobStatus::new("expired")));
        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;
        assert_eq!(report.outcome, PollOutcome::Expired);
        assert_eq!(jobs.status_call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_attempts() {
        let jobs = ScriptedJobs::new().always(Ok(JobStatus::new("running")));
        let started = Instant::now();

        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;

        assert_eq!(report.outcome, PollOutcome::TimedOut { attempts: 150 });
        assert_eq!(jobs.status_call_count(), 150);
        assert_eq!(started.elapsed(), Duration::from_millis(2000) * 149);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_not_retried() {
        let jobs = ScriptedJobs::new().always(Err(JobApiError::Unauthorized(401)));
        let report = poll_job(&jobs, "job-1", &PollPolicy::default()).await;
        assert_eq!(
            report.outcome,
            PollOutcome::Rejected(JobApiError::Unauthorized(401))
        );
        assert_eq!(jobs.status_call_count(), 1);
    }
}
