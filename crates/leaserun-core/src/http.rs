//! Shared HTTP client construction.
//!
//! The vault session and the reservation adjuster each get their own
//! `reqwest::Client`. For the vault client, server certificate verification
//! is OFF unless the caller opts in with `--verify-vault-tls`: existing
//! deployments reach the vault over a trusted network segment and skip
//! chain validation. The reservation client talks to the public Google API
//! and always verifies.

use std::path::Path;
use std::time::Duration;

/// Error building the HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("failed to read client certificate bundle: {0}")]
    ClientCertRead(#[source] std::io::Error),

    #[error("failed to parse client certificate bundle: {0}")]
    ClientCertParse(#[source] reqwest::Error),

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

/// TLS options for the shared client.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions<'a> {
    /// Verify the server certificate chain. Defaults to false.
    pub verify_server_cert: bool,
    /// Optional PEM bundle containing a client certificate and key.
    pub client_cert: Option<&'a Path>,
}

fn user_agent() -> String {
    format!("leaserun/{}", env!("CARGO_PKG_VERSION"))
}

/// Build the shared client: crate user agent, 30 second request timeout,
/// single attempt per request (no retries anywhere in this crate).
pub fn build_client(tls: &TlsOptions<'_>) -> Result<reqwest::Client, HttpError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent())
        .timeout(Duration::from_secs(30));

    if !tls.verify_server_cert {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(path) = tls.client_cert {
        let pem = std::fs::read(path).map_err(HttpError::ClientCertRead)?;
        let identity = reqwest::Identity::from_pem(&pem).map_err(HttpError::ClientCertParse)?;
        builder = builder.identity(identity);
    }

    builder.build().map_err(HttpError::Build)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
