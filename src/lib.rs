// ABOUTME: Client data portal backend library
// ABOUTME: Resolves trademark search extractions via a CRM action and a remote job queue

pub mod config;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod poller;
pub mod registry;
pub mod remote;
pub mod server;

pub use config::Config;
pub use error::PortalError;
pub use normalize::{normalize, ClientInfo, NormalizedDataset, Row, Tab};
pub use orchestrator::{Orchestrator, Resolution};
pub use poller::{poll_job, PollOutcome, PollPolicy};
pub use registry::InFlightRegistry;
