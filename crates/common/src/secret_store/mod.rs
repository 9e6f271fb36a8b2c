use std::fmt::Debug;

use async_trait::async_trait;

mod file;
mod memory;

pub use file::FileSecretStore;
pub use memory::MemorySecretStore;

/// Errors reported by a secret store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretStoreError {
    /// The store refused access (locked device, permissions)
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// Bytes are present for the account but are not a valid key
    #[error("corrupt entry for account {0}")]
    CorruptEntry(String),
    /// Any other storage failure
    #[error("secret store error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for SecretStoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => SecretStoreError::AccessDenied(err.to_string()),
            _ => SecretStoreError::Storage(err.to_string()),
        }
    }
}

/// Durable, account-keyed storage for raw key bytes
///
/// Implementations sit in front of whatever the platform offers for
/// protected storage. The contract is intentionally small so tests can swap
/// in [`MemorySecretStore`].
#[async_trait]
pub trait SecretStore: Send + Sync + Debug + Clone + 'static {
    /// Store `key_bytes` for `account`, replacing any existing entry
    async fn put(&self, account: &str, key_bytes: &[u8]) -> Result<(), SecretStoreError>;

    /// Read the bytes for `account`
    ///
    /// # Returns
    /// * `Ok(Some(bytes))` - An entry exists
    /// * `Ok(None)` - No entry for this account; this is not an error
    async fn get(&self, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError>;

    /// Remove the entry for `account`; removing a missing entry succeeds
    async fn delete(&self, account: &str) -> Result<(), SecretStoreError>;

    /// Remove every entry in the store
    async fn clear_all(&self) -> Result<(), SecretStoreError>;
}
