//! `gcloud` CLI integration.
//!
//! Two invocations per run: activating the leased service account, and
//! (reservation path only) fetching a bearer access token. The binary is
//! resolved once at startup so a missing `gcloud` fails before any vault
//! call is made.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::keyfile::CREDENTIALS_ENV;
use crate::secret::Secret;

/// Environment variable to explicitly set the path to the `gcloud` binary.
pub const GCLOUD_PATH_ENV: &str = "LEASERUN_GCLOUD_PATH";

/// Error from the `gcloud` CLI.
#[derive(Debug, thiserror::Error)]
pub enum GcloudError {
    #[error("gcloud not found (install the Google Cloud SDK or set LEASERUN_GCLOUD_PATH)")]
    NotFound,

    #[error("gcloud execution failed: {0}")]
    ExecFailed(String),

    #[error("gcloud returned an error: {0}")]
    CommandFailed(String),

    #[error("failed to read gcloud output: {0}")]
    ParseError(String),
}

/// Client that shells out to the `gcloud` binary.
#[derive(Debug, Clone)]
pub struct GcloudCli {
    gcloud_path: String,
}

impl GcloudCli {
    /// Create a new client, resolving the `gcloud` binary path.
    ///
    /// Checks `LEASERUN_GCLOUD_PATH` first, then searches PATH.
    pub fn new() -> Result<Self, GcloudError> {
        let gcloud_path = Self::find_gcloud_binary()?;
        Ok(Self { gcloud_path })
    }

    /// Create a client backed by a specific binary (stub binaries in tests).
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            gcloud_path: path.into(),
        }
    }

    fn find_gcloud_binary() -> Result<String, GcloudError> {
        if let Ok(path) = std::env::var(GCLOUD_PATH_ENV)
            && Path::new(&path).exists()
        {
            return Ok(path);
        }

        let output = std::process::Command::new("which")
            .arg("gcloud")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map_err(|_| GcloudError::NotFound)?;

        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            if !path.is_empty() {
                return Ok(path);
            }
        }

        Err(GcloudError::NotFound)
    }

    /// Run `gcloud` with the given args and return stdout.
    async fn run(&self, args: &[&str], key_file: Option<&Path>) -> Result<String, GcloudError> {
        let mut cmd = Command::new(&self.gcloud_path);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(key_file) = key_file {
            cmd.env(CREDENTIALS_ENV, key_file);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| GcloudError::ExecFailed(e.to_string()))?;

        if output.status.success() {
            String::from_utf8(output.stdout)
                .map_err(|e| GcloudError::ParseError(format!("non-UTF8 output: {e}")))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // First non-empty stderr line only; full stderr may contain paths.
            let msg = stderr
                .lines()
                .find(|l| !l.is_empty())
                .unwrap_or("unknown error")
                .to_owned();
            Err(GcloudError::CommandFailed(msg))
        }
    }

    /// Activate the leased service account from its key file.
    pub async fn activate_service_account(&self, key_file: &Path) -> Result<(), GcloudError> {
        let key_file_arg = key_file.to_string_lossy();
        self.run(
            &[
                "auth",
                "activate-service-account",
                "--key-file",
                &key_file_arg,
            ],
            Some(key_file),
        )
        .await?;
        Ok(())
    }

    /// Fetch a bearer access token for the active account, with trailing
    /// line endings stripped.
    pub async fn print_access_token(&self, key_file: &Path) -> Result<Secret, GcloudError> {
        let raw = self
            .run(&["auth", "print-access-token"], Some(key_file))
            .await?;
        let token = raw.trim_end_matches(['\r', '\n']).to_owned();
        if token.is_empty() {
            return Err(GcloudError::ParseError("empty access token".into()));
        }
        Ok(Secret::from_string(token))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
