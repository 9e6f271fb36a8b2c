use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use zeroize::Zeroizing;

use super::{SecretStore, SecretStoreError};

/// In-memory secret store for tests and ephemeral sessions
///
/// `lock` makes every operation fail with `AccessDenied`, the same way a
/// platform store behaves while the device is locked.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    entries: Arc<RwLock<HashMap<String, Zeroizing<Vec<u8>>>>>,
    locked: Arc<AtomicBool>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    /// Number of accounts currently stored
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_access(&self) -> Result<(), SecretStoreError> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(SecretStoreError::AccessDenied("store is locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn put(&self, account: &str, key_bytes: &[u8]) -> Result<(), SecretStoreError> {
        self.check_access()?;
        self.entries
            .write()
            .insert(account.to_string(), Zeroizing::new(key_bytes.to_vec()));
        Ok(())
    }

    async fn get(&self, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        self.check_access()?;
        Ok(self
            .entries
            .read()
            .get(account)
            .map(|bytes| bytes.to_vec()))
    }

    async fn delete(&self, account: &str) -> Result<(), SecretStoreError> {
        self.check_access()?;
        self.entries.write().remove(account);
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), SecretStoreError> {
        self.check_access()?;
        self.entries.write().clear();
        Ok(())
    }
}
