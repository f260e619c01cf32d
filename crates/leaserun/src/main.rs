use std::path::PathBuf;

use clap::Parser;
use leaserun_core::{ReservationConfig, RunConfig, Secret};

/// Broker a short-lived service-account key from a vault, run a script with
/// it, and revoke the lease when done.
///
/// Secrets are best passed through the LEASERUN_* environment variables so
/// they never appear in the process argument list.
#[derive(Debug, Parser)]
#[command(name = "leaserun", version)]
struct Cli {
    /// Base URL of the vault, e.g. https://vault.internal:8200.
    #[arg(long, env = "LEASERUN_VAULT_URL")]
    vault_url: String,

    /// Approle role id.
    #[arg(long, env = "LEASERUN_ROLE_ID")]
    role_id: String,

    /// Approle secret id.
    #[arg(long, env = "LEASERUN_SECRET_ID", hide_env_values = true)]
    secret_id: String,

    /// Vault path that yields a leased service-account key on read.
    #[arg(long, env = "LEASERUN_ROLESET_PATH")]
    roleset_path: String,

    /// Shell command text to execute with the obtained credential.
    #[arg(long, env = "LEASERUN_SCRIPT")]
    script: String,

    /// Stream the script's stdout/stderr live instead of suppressing it.
    #[arg(long, env = "LEASERUN_PRINT_SCRIPT_OUTPUT", default_value_t = false)]
    print_script_output: bool,

    /// Adjust the BigQuery BI Engine reservation after the script.
    #[arg(long, env = "LEASERUN_SET_BI_ENGINE_RESERVATION", default_value_t = false)]
    set_bi_engine_reservation: bool,

    /// GCP project that owns the reservation.
    #[arg(long, env = "LEASERUN_GOOGLE_PROJECT_ID", required_if_eq("set_bi_engine_reservation", "true"))]
    google_project_id: Option<String>,

    /// Reservation location, e.g. us-central1.
    #[arg(long, env = "LEASERUN_LOCATION", required_if_eq("set_bi_engine_reservation", "true"))]
    location: Option<String>,

    /// Desired reservation size in GB.
    #[arg(long, env = "LEASERUN_RESERVATION_GB", required_if_eq("set_bi_engine_reservation", "true"))]
    reservation_gb: Option<u64>,

    /// Verify the vault's server certificate (off by default).
    #[arg(long, env = "LEASERUN_VERIFY_VAULT_TLS", default_value_t = false)]
    verify_vault_tls: bool,

    /// Path to a PEM bundle with a client certificate for the vault.
    #[arg(long, env = "LEASERUN_VAULT_CLIENT_CERT")]
    vault_client_cert: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        let reservation = if self.set_bi_engine_reservation {
            Some(ReservationConfig {
                project_id: self.google_project_id.unwrap_or_default(),
                location: self.location.unwrap_or_default(),
                size_gb: self.reservation_gb.unwrap_or_default(),
            })
        } else {
            None
        };

        RunConfig {
            vault_url: self.vault_url,
            role_id: self.role_id,
            secret_id: Secret::from_string(self.secret_id),
            roleset_path: self.roleset_path,
            script: self.script,
            print_script_output: self.print_script_output,
            reservation,
            verify_vault_tls: self.verify_vault_tls,
            vault_client_cert: self.vault_client_cert,
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = leaserun_core::run(cli.into_config()).await {
        eprintln!("leaserun: {e}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
