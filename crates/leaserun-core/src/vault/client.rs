//! HashiCorp Vault HTTP client for the three calls a run makes.
//!
//! - `POST /v1/auth/approle/login` — exchange role id + secret id for a token
//! - `GET /v1/{roleset_path}` — read a leased service-account key
//! - `PUT /v1/sys/leases/revoke` — give the lease back
//!
//! Single attempt per call, no retries. Login and roleset failures are fatal
//! to the run; a revoke failure is the caller's to log and swallow.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;

use crate::secret::Secret;

/// Vault API error types. Response bodies are never embedded in errors.
#[derive(Debug, thiserror::Error)]
pub enum VaultApiError {
    #[error("network error communicating with vault")]
    Network(#[source] reqwest::Error),

    #[error("approle login failed with status {0}")]
    LoginFailed(u16),

    #[error("roleset read failed with status {0}")]
    RolesetFailed(u16),

    #[error("lease revoke failed with status {0}")]
    RevokeFailed(u16),

    #[error("malformed vault response: missing {0}")]
    MalformedResponse(&'static str),

    #[error("could not decode private_key_data as base64")]
    KeyDecode(#[source] base64::DecodeError),
}

/// A leased service-account key as returned by a roleset read.
#[derive(Debug)]
pub struct LeasedKey {
    /// Lease identifier, consumed exactly once by the revoke call.
    pub lease_id: String,
    /// Decoded key bytes.
    pub key: Secret,
}

/// Percent-encode a single path segment. Keeps unreserved characters as-is.
fn percent_encode_segment(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        let safe = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~');
        if safe {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(
                char::from_digit((b >> 4) as u32, 16)
                    .unwrap()
                    .to_ascii_uppercase(),
            );
            out.push(
                char::from_digit((b & 0x0F) as u32, 16)
                    .unwrap()
                    .to_ascii_uppercase(),
            );
        }
    }
    out
}

/// Percent-encode each segment of a slash-delimited vault path.
fn encode_vault_path(path: &str) -> String {
    path.split('/')
        .map(percent_encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Vault REST API client.
#[derive(Debug, Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    base_url: String,
}

impl VaultClient {
    /// Create a client against the given base URL with a shared HTTP client.
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Exchange approle credentials for a vault token.
    ///
    /// Any status >= 400 is [`VaultApiError::LoginFailed`]; a 2xx body
    /// without `auth.client_token` is a malformed-response error, never a
    /// silent continue.
    pub async fn approle_login(
        &self,
        role_id: &str,
        secret_id: &Secret,
    ) -> Result<Secret, VaultApiError> {
        let url = format!("{}/v1/auth/approle/login", self.base_url);
        let body = json!({
            "role_id": role_id,
            "secret_id": secret_id.as_str().unwrap_or_default(),
        });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(VaultApiError::Network)?;

        let status = resp.status().as_u16();
        if status >= 400 {
            return Err(VaultApiError::LoginFailed(status));
        }

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(VaultApiError::Network)?;
        let token = body
            .get("auth")
            .and_then(|v| v.get("client_token"))
            .and_then(|v| v.as_str())
            .ok_or(VaultApiError::MalformedResponse("auth.client_token"))?;

        Ok(Secret::from_string(token.to_owned()))
    }

    /// Read the roleset path, yielding a lease id and the decoded key bytes.
    pub async fn read_roleset(
        &self,
        roleset_path: &str,
        token: &Secret,
    ) -> Result<LeasedKey, VaultApiError> {
        let path = encode_vault_path(roleset_path.trim_matches('/'));
        let url = format!("{}/v1/{path}", self.base_url);

        let resp = self
            .http
            .get(&url)
            .header("X-Vault-Token", token.as_str().unwrap_or_default())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(VaultApiError::Network)?;

        let status = resp.status().as_u16();
        if status >= 400 {
            return Err(VaultApiError::RolesetFailed(status));
        }

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(VaultApiError::Network)?;

        let lease_id = body
            .get("lease_id")
            .and_then(|v| v.as_str())
            .ok_or(VaultApiError::MalformedResponse("lease_id"))?
            .to_owned();
        let encoded = body
            .get("data")
            .and_then(|v| v.get("private_key_data"))
            .and_then(|v| v.as_str())
            .ok_or(VaultApiError::MalformedResponse("data.private_key_data"))?;
        let key = BASE64.decode(encoded).map_err(VaultApiError::KeyDecode)?;

        Ok(LeasedKey {
            lease_id,
            key: Secret::from_bytes(key),
        })
    }

    /// Revoke a lease. Vault answers 204 on success; anything else is
    /// [`VaultApiError::RevokeFailed`]. The orchestrator logs a failure and
    /// moves on — a dangling lease never fails a run whose script succeeded.
    pub async fn revoke_lease(
        &self,
        lease_id: &str,
        token: &Secret,
    ) -> Result<(), VaultApiError> {
        let url = format!("{}/v1/sys/leases/revoke", self.base_url);
        let body = json!({ "lease_id": lease_id });

        let resp = self
            .http
            .put(&url)
            .header("X-Vault-Token", token.as_str().unwrap_or_default())
            .json(&body)
            .send()
            .await
            .map_err(VaultApiError::Network)?;

        match resp.status().as_u16() {
            204 => Ok(()),
            other => Err(VaultApiError::RevokeFailed(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
