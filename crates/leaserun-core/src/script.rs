//! Caller-supplied script execution.
//!
//! The script is arbitrary shell text run via `sh -c` — this is the point of
//! the tool, not a capability to sandbox away. Output is either streamed
//! live to the parent's stdout/stderr or fully discarded; it is never
//! captured and returned. The child sees the key file through
//! `GOOGLE_APPLICATION_CREDENTIALS`.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::keyfile::CREDENTIALS_ENV;

/// Script execution error.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("script exited with status {0}")]
    Failed(i32),

    #[error("script terminated by signal")]
    Killed,
}

/// Run the script synchronously and wait for it to finish. A hung script
/// blocks the run; there is no script timeout.
pub async fn run_script(
    script: &str,
    key_file: &Path,
    print_output: bool,
) -> Result<(), ScriptError> {
    let (stdout, stderr) = if print_output {
        (Stdio::inherit(), Stdio::inherit())
    } else {
        (Stdio::null(), Stdio::null())
    };

    let status = Command::new("sh")
        .arg("-c")
        .arg(script)
        .env(CREDENTIALS_ENV, key_file)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .status()
        .await
        .map_err(ScriptError::Spawn)?;

    if status.success() {
        Ok(())
    } else {
        match status.code() {
            Some(code) => Err(ScriptError::Failed(code)),
            None => Err(ScriptError::Killed),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
