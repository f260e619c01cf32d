//! Vault approle session: login, roleset read, lease revoke.

pub mod client;

pub use client::{LeasedKey, VaultApiError, VaultClient};
