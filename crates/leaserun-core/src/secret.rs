//! In-memory wrapper for credential material.
//!
//! Everything secret that passes through a run — the approle secret id, the
//! vault token, the service-account key bytes — lives in a [`Secret`] so it
//! is zeroed on drop and can never end up in a log line or error message.

use std::fmt;

use zeroize::Zeroizing;

/// Secret bytes that are zeroed when dropped. Debug and Display always
/// render `[REDACTED]`.
pub struct Secret(Zeroizing<Vec<u8>>);

impl Secret {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Wrap a secret string, consuming it.
    pub fn from_string(s: String) -> Self {
        Self(Zeroizing::new(s.into_bytes()))
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The bytes as UTF-8, if they are valid UTF-8. Tokens are always
    /// textual; key material may not be.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Best-effort `mlock()` so the secret is not swapped to disk. May fail
    /// under RLIMIT_MEMLOCK; that is logged, not fatal.
    pub fn lock_memory(&self) {
        #[cfg(unix)]
        {
            let len = self.0.len();
            if len == 0 {
                return;
            }
            let ret = unsafe { libc::mlock(self.0.as_ptr() as *const libc::c_void, len) };
            if ret != 0 {
                tracing::warn!(
                    "mlock failed for {len} byte secret: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
