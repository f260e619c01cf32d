//! Run configuration.
//!
//! All inputs are collected up front and validated once, before any network
//! call is made. The approle secret id is held as a [`Secret`] so it never
//! appears in diagnostics.

use std::path::PathBuf;

use crate::secret::Secret;

/// Configuration error. Always raised before the first network call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required input: {0}")]
    MissingInput(&'static str),

    #[error("reservation adjustment enabled but {0} was not provided")]
    MissingReservationInput(&'static str),

    #[error("reservation size must be at least 1 GB")]
    ZeroReservationSize,
}

/// Parameters for the optional BI Engine reservation adjustment.
#[derive(Debug, Clone)]
pub struct ReservationConfig {
    /// GCP project that owns the reservation.
    pub project_id: String,
    /// Reservation location, e.g. `us-central1`.
    pub location: String,
    /// Desired reservation size in GB.
    pub size_gb: u64,
}

/// Immutable inputs for one run.
#[derive(Debug)]
pub struct RunConfig {
    /// Base URL of the vault, e.g. `https://vault.internal:8200`.
    pub vault_url: String,
    /// Approle role id.
    pub role_id: String,
    /// Approle secret id.
    pub secret_id: Secret,
    /// Vault path that yields a leased service-account key on read,
    /// e.g. `gcp/roleset/ci-deployer/key`.
    pub roleset_path: String,
    /// Shell command text to execute with the obtained credential.
    pub script: String,
    /// Stream script stdout/stderr live instead of suppressing it.
    pub print_script_output: bool,
    /// Reservation adjustment parameters, when that path is enabled.
    pub reservation: Option<ReservationConfig>,
    /// Verify the vault's server certificate. Off by default: existing
    /// deployments pin trust on network placement, not chain validation.
    pub verify_vault_tls: bool,
    /// Optional PEM bundle with a client certificate for the vault.
    pub vault_client_cert: Option<PathBuf>,
}

impl RunConfig {
    /// Reject empty required fields and inconsistent reservation inputs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vault_url.trim().is_empty() {
            return Err(ConfigError::MissingInput("vault url"));
        }
        if self.role_id.trim().is_empty() {
            return Err(ConfigError::MissingInput("role id"));
        }
        if self.secret_id.is_empty() {
            return Err(ConfigError::MissingInput("secret id"));
        }
        if self.roleset_path.trim().is_empty() {
            return Err(ConfigError::MissingInput("roleset path"));
        }
        if self.script.trim().is_empty() {
            return Err(ConfigError::MissingInput("script"));
        }
        if let Some(reservation) = &self.reservation {
            if reservation.project_id.trim().is_empty() {
                return Err(ConfigError::MissingReservationInput("google project id"));
            }
            if reservation.location.trim().is_empty() {
                return Err(ConfigError::MissingReservationInput("location"));
            }
            if reservation.size_gb == 0 {
                return Err(ConfigError::ZeroReservationSize);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
