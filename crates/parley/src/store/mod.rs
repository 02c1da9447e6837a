//! Credential persistence.
//!
//! The transport hands us an opaque credential blob whenever its session keys
//! change. We persist it so the next session generation can resume without a
//! new authentication challenge. Wiping the store forces a fresh challenge.

mod error;
mod file;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{CredentialError, CredentialResult};
pub use file::FileCredentialStore;

/// Opaque session credentials owned by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub serde_json::Value);

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load stored credentials, or `None` when nothing is stored.
    async fn load(&self) -> CredentialResult<Option<Credentials>>;

    /// Replace stored credentials.
    async fn save(&self, credentials: &Credentials) -> CredentialResult<()>;

    /// Remove all stored session state. Idempotent.
    async fn clear(&self) -> CredentialResult<()>;
}
