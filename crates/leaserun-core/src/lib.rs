//! Short-lived credential broker and task runner for CI pipelines.
//!
//! One run authenticates to a vault via approle, reads a leased GCP
//! service-account key from a roleset, runs a caller-supplied script with
//! that key, optionally adjusts a BigQuery BI Engine reservation, and then
//! revokes the lease — always, regardless of how the script went.

pub mod config;
pub mod gcloud;
pub mod http;
pub mod keyfile;
pub mod reservation;
pub mod run;
pub mod script;
pub mod secret;
pub mod vault;

pub use config::{ConfigError, ReservationConfig, RunConfig};
pub use run::{RunError, Runner, run};
pub use secret::Secret;
