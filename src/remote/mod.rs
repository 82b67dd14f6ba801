// ABOUTME: Remote collaborators reached over HTTP
// ABOUTME: The CRM action and the background extraction job queue

pub mod client;
pub mod crm;
pub mod models;

pub use client::{JobApi, JobApiError, JobClient};
pub use crm::{CrmApi, CrmClient, CrmError};
pub use models::{JobState, JobStatus};
