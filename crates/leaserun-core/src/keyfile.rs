//! Ephemeral service-account key file.
//!
//! The key lives on disk only for the duration of one run, at a fixed
//! well-known name so `gcloud` invocations and the caller's script agree on
//! where it is. The guard removes the file on drop, so every exit path out
//! of the post-lease region — including fatal ones — cleans it up.

use std::path::{Path, PathBuf};

use crate::secret::Secret;

/// Fixed name of the key file, written into the working directory.
pub const KEY_FILE_NAME: &str = "sa-key.json";

/// Credential-discovery variable read by Google client libraries.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Key file write failure. Removal failures are logged, never raised.
#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("failed to write {KEY_FILE_NAME}: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to set permissions on {KEY_FILE_NAME}: {0}")]
    Permissions(#[source] std::io::Error),
}

/// Owns the on-disk key file; removes it best-effort on drop.
#[derive(Debug)]
pub struct KeyFileGuard {
    path: PathBuf,
}

impl KeyFileGuard {
    /// Write the key bytes to `<dir>/sa-key.json` with mode 0600.
    pub fn write(dir: &Path, key: &Secret) -> Result<Self, KeyFileError> {
        let path = dir.join(KEY_FILE_NAME);
        std::fs::write(&path, key.as_bytes()).map_err(KeyFileError::Write)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .map_err(KeyFileError::Permissions)?;
        }
        Ok(Self { path })
    }

    /// Path of the written key file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KeyFileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("failed to remove {}: {e}", self.path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
