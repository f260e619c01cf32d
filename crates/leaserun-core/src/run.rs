//! Run orchestration.
//!
//! One run walks Start → Authenticated → Leased → Activated →
//! ScriptExecuted → [ReservationAdjusted] → Revoked. Login and roleset
//! failures stop the run before a lease exists, so nothing needs cleanup.
//! From the moment a lease exists, exactly one revoke attempt happens on
//! every exit path, and the revoke outcome never changes the run's result.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{ConfigError, ReservationConfig, RunConfig};
use crate::gcloud::{GcloudCli, GcloudError};
use crate::http::{HttpError, TlsOptions, build_client};
use crate::keyfile::{KeyFileError, KeyFileGuard};
use crate::reservation::{ReservationClient, ReservationError, bytes_to_gb};
use crate::script::{ScriptError, run_script};
use crate::vault::{LeasedKey, VaultApiError, VaultClient};

/// Any fatal run failure. Revoke failures are deliberately absent: they are
/// logged at `warn` and never escalated.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Vault(#[from] VaultApiError),

    #[error(transparent)]
    KeyFile(#[from] KeyFileError),

    #[error(transparent)]
    Gcloud(#[from] GcloudError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Reservation(#[from] ReservationError),
}

/// One fully wired run.
#[derive(Debug)]
pub struct Runner {
    config: RunConfig,
    vault: VaultClient,
    reservation: ReservationClient,
    gcloud: GcloudCli,
    work_dir: PathBuf,
}

/// TLS options for the vault client. Verification follows the
/// `--verify-vault-tls` flag; the client certificate applies here only.
fn vault_tls(config: &RunConfig) -> TlsOptions<'_> {
    TlsOptions {
        verify_server_cert: config.verify_vault_tls,
        client_cert: config.vault_client_cert.as_deref(),
    }
}

/// TLS options for the reservation client. The Google endpoint always
/// verifies; the vault flag does not reach it.
fn reservation_tls() -> TlsOptions<'static> {
    TlsOptions {
        verify_server_cert: true,
        client_cert: None,
    }
}

impl Runner {
    /// Validate the configuration and wire up the clients. Fails before any
    /// network call: bad config, unreadable client certificate, or a missing
    /// `gcloud` binary all surface here.
    pub fn from_config(config: RunConfig) -> Result<Self, RunError> {
        config.validate()?;

        let vault = VaultClient::new(build_client(&vault_tls(&config))?, &config.vault_url);
        let reservation = ReservationClient::new(build_client(&reservation_tls())?);
        let gcloud = GcloudCli::new()?;

        Ok(Self {
            config,
            vault,
            reservation,
            gcloud,
            work_dir: PathBuf::from("."),
        })
    }

    /// Execute the run.
    pub async fn execute(&self) -> Result<(), RunError> {
        info!("authenticating to vault");
        let token = self
            .vault
            .approle_login(&self.config.role_id, &self.config.secret_id)
            .await?;
        token.lock_memory();

        info!("reading roleset {}", self.config.roleset_path);
        let leased = self
            .vault
            .read_roleset(&self.config.roleset_path, &token)
            .await?;
        leased.key.lock_memory();

        // A lease now exists. Capture the primary result, then revoke
        // unconditionally before returning it.
        let result = self.leased_work(&leased).await;

        info!("revoking lease {}", leased.lease_id);
        match self.vault.revoke_lease(&leased.lease_id, &token).await {
            Ok(()) => info!("revoked lease {}", leased.lease_id),
            Err(e) => warn!("failed to revoke lease {}: {e}", leased.lease_id),
        }

        result
    }

    /// Everything between Leased and Revoked. The key file guard removes
    /// `sa-key.json` when this returns, on the failure paths too.
    async fn leased_work(&self, leased: &LeasedKey) -> Result<(), RunError> {
        let key_file = KeyFileGuard::write(&self.work_dir, &leased.key)?;

        info!("activating service account");
        self.gcloud
            .activate_service_account(key_file.path())
            .await?;

        info!("executing script");
        run_script(
            &self.config.script,
            key_file.path(),
            self.config.print_script_output,
        )
        .await?;

        if let Some(reservation) = &self.config.reservation {
            self.adjust_reservation(reservation, key_file.path()).await?;
        }

        Ok(())
    }

    async fn adjust_reservation(
        &self,
        reservation: &ReservationConfig,
        key_file: &Path,
    ) -> Result<(), RunError> {
        let token = self.gcloud.print_access_token(key_file).await?;

        let current = self
            .reservation
            .get_reservation(&reservation.project_id, &reservation.location, &token)
            .await?;
        info!("current reservation size is {} GB", bytes_to_gb(current));

        info!("setting reservation size to {} GB", reservation.size_gb);
        let new_size = self
            .reservation
            .set_reservation(
                &reservation.project_id,
                &reservation.location,
                &token,
                reservation.size_gb,
            )
            .await?;
        info!("new reservation size is {} GB", bytes_to_gb(new_size));

        Ok(())
    }
}

/// Convenience entry point: wire a runner from config and execute it.
pub async fn run(config: RunConfig) -> Result<(), RunError> {
    Runner::from_config(config)?.execute().await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyfile::KEY_FILE_NAME;
    use crate::secret::Secret;

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LEASE_ID: &str = "gcp/roleset/ci/key/abc123";

    fn config(script: &str, reservation: Option<ReservationConfig>) -> RunConfig {
        RunConfig {
            vault_url: "http://unused.invalid".into(),
            role_id: "r1".into(),
            secret_id: Secret::from_string("s1".into()),
            roleset_path: "roles/x".into(),
            script: script.into(),
            print_script_output: false,
            reservation,
            verify_vault_tls: false,
            vault_client_cert: None,
        }
    }

    #[cfg(unix)]
    fn gcloud_stub(dir: &Path) -> GcloudCli {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("gcloud");
        std::fs::write(
            &path,
            "#!/bin/sh\nif [ \"$2\" = \"print-access-token\" ]; then echo ya29.token; fi\nexit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        GcloudCli::with_path(path.to_string_lossy())
    }

    #[cfg(unix)]
    fn runner(
        config: RunConfig,
        vault_server: &MockServer,
        reservation_server: &MockServer,
        dir: &TempDir,
    ) -> Runner {
        let http = reqwest::Client::new();
        Runner {
            config,
            vault: VaultClient::new(http.clone(), &vault_server.uri()),
            reservation: ReservationClient::with_base_url(http, &reservation_server.uri()),
            gcloud: gcloud_stub(dir.path()),
            work_dir: dir.path().to_owned(),
        }
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .and(body_json(json!({"role_id": "r1", "secret_id": "s1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": { "client_token": "hvs.token" }
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_roleset(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1/roles/x"))
            .and(header("x-vault-token", "hvs.token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "lease_id": LEASE_ID,
                "data": { "private_key_data": BASE64.encode(b"key bytes") }
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_revoke(server: &MockServer, status: u16, expected_calls: u64) {
        Mock::given(method("PUT"))
            .and(path("/v1/sys/leases/revoke"))
            .and(body_json(json!({"lease_id": LEASE_ID})))
            .respond_with(ResponseTemplate::new(status))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn happy_path_runs_script_and_revokes_once() {
        let vault = MockServer::start().await;
        let reservation = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        mount_login(&vault).await;
        mount_roleset(&vault).await;
        mount_revoke(&vault, 204, 1).await;

        let marker = dir.path().join("ran");
        let script = format!("touch {}", marker.display());
        let runner = runner(config(&script, None), &vault, &reservation, &dir);

        runner.execute().await.unwrap();

        assert!(marker.exists());
        assert!(!dir.path().join(KEY_FILE_NAME).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_failure_still_revokes_and_removes_key_file() {
        let vault = MockServer::start().await;
        let reservation = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        mount_login(&vault).await;
        mount_roleset(&vault).await;
        mount_revoke(&vault, 204, 1).await;

        let runner = runner(config("exit 7", None), &vault, &reservation, &dir);

        let err = runner.execute().await.unwrap_err();
        assert!(matches!(err, RunError::Script(ScriptError::Failed(7))));
        assert!(!dir.path().join(KEY_FILE_NAME).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_revoke_does_not_change_the_outcome() {
        let vault = MockServer::start().await;
        let reservation = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        mount_login(&vault).await;
        mount_roleset(&vault).await;
        mount_revoke(&vault, 400, 1).await;

        let runner = runner(config("true", None), &vault, &reservation, &dir);

        // Script succeeded, so the run succeeds despite the dangling lease.
        runner.execute().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn login_denied_stops_before_roleset_and_key_file() {
        let vault = MockServer::start().await;
        let reservation = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&vault)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/roles/x"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&vault)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/sys/leases/revoke"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&vault)
            .await;

        let runner = runner(config("true", None), &vault, &reservation, &dir);

        let err = runner.execute().await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Vault(VaultApiError::LoginFailed(403))
        ));
        assert!(!dir.path().join(KEY_FILE_NAME).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reservation_path_gets_then_patches_desired_bytes() {
        let vault = MockServer::start().await;
        let reservation = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        mount_login(&vault).await;
        mount_roleset(&vault).await;
        mount_revoke(&vault, 204, 1).await;

        Mock::given(method("GET"))
            .and(path("/v1/projects/p1/locations/us/biReservation"))
            .and(header("authorization", "Bearer ya29.token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "size": 1073741824u64
            })))
            .expect(1)
            .mount(&reservation)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/v1/projects/p1/locations/us/biReservation"))
            .and(body_json(json!({
                "name": "projects/p1/locations/us/biReservation",
                "size": 2147483648u64
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "size": "2147483648"
            })))
            .expect(1)
            .mount(&reservation)
            .await;

        let reservation_config = ReservationConfig {
            project_id: "p1".into(),
            location: "us".into(),
            size_gb: 2,
        };
        let runner = runner(
            config("true", Some(reservation_config)),
            &vault,
            &reservation,
            &dir,
        );

        runner.execute().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reservation_failure_still_revokes() {
        let vault = MockServer::start().await;
        let reservation = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        mount_login(&vault).await;
        mount_roleset(&vault).await;
        mount_revoke(&vault, 204, 1).await;

        Mock::given(method("GET"))
            .and(path("/v1/projects/p1/locations/us/biReservation"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&reservation)
            .await;

        let reservation_config = ReservationConfig {
            project_id: "p1".into(),
            location: "us".into(),
            size_gb: 2,
        };
        let runner = runner(
            config("true", Some(reservation_config)),
            &vault,
            &reservation,
            &dir,
        );

        let err = runner.execute().await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Reservation(ReservationError::Status(500))
        ));
        assert!(!dir.path().join(KEY_FILE_NAME).exists());
    }

    #[test]
    fn reservation_tls_always_verifies_regardless_of_vault_flags() {
        let mut insecure = config("true", None);
        insecure.verify_vault_tls = false;
        insecure.vault_client_cert = Some(PathBuf::from("vault-client.pem"));

        // The vault client honors the flag and carries the client cert.
        let vault = vault_tls(&insecure);
        assert!(!vault.verify_server_cert);
        assert!(vault.client_cert.is_some());

        // The reservation client never inherits either.
        let reservation = reservation_tls();
        assert!(reservation.verify_server_cert);
        assert!(reservation.client_cert.is_none());
    }

    #[test]
    fn invalid_config_fails_before_anything_else() {
        let mut bad = config("true", None);
        bad.roleset_path = "".into();
        let err = Runner::from_config(bad).unwrap_err();
        assert!(matches!(err, RunError::Config(_)));
    }
}
