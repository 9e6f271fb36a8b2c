use crate::crypto::{PrivateKey, PRIVATE_KEY_SIZE};
use crate::secret_store::{SecretStore, SecretStoreError};

/// Loads and creates a device's private identity key
///
/// A thin layer over a [`SecretStore`] that knows the stored bytes are a
/// Curve25519 scalar: anything that is not exactly 32 bytes is reported as
/// [`SecretStoreError::CorruptEntry`].
#[derive(Debug, Clone)]
pub struct IdentityKeyStore<S> {
    store: S,
}

impl<S> IdentityKeyStore<S>
where
    S: SecretStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn secret_store(&self) -> &S {
        &self.store
    }

    /// Load the key stored for `account`, if any
    pub async fn load_or_none(&self, account: &str) -> Result<Option<PrivateKey>, SecretStoreError> {
        let Some(bytes) = self.store.get(account).await? else {
            return Ok(None);
        };
        let bytes = zeroize::Zeroizing::new(bytes);
        if bytes.len() != PRIVATE_KEY_SIZE {
            tracing::warn!(
                "stored identity key for {} has {} bytes, expected {}",
                account,
                bytes.len(),
                PRIVATE_KEY_SIZE
            );
            return Err(SecretStoreError::CorruptEntry(account.to_string()));
        }
        PrivateKey::try_from(&bytes[..])
            .map(Some)
            .map_err(|_| SecretStoreError::CorruptEntry(account.to_string()))
    }

    /// Generate a fresh random key and persist it for `account`
    pub async fn generate_and_persist(&self, account: &str) -> Result<PrivateKey, SecretStoreError> {
        let key = PrivateKey::generate().map_err(|e| SecretStoreError::Storage(e.to_string()))?;
        self.store(account, &key).await?;
        tracing::info!("generated identity key for {}", account);
        Ok(key)
    }

    /// Persist an existing key for `account`, replacing whatever was stored
    pub async fn store(&self, account: &str, key: &PrivateKey) -> Result<(), SecretStoreError> {
        let bytes = zeroize::Zeroizing::new(key.to_bytes());
        self.store.put(account, &bytes[..]).await
    }

    pub async fn remove(&self, account: &str) -> Result<(), SecretStoreError> {
        self.store.delete(account).await
    }

    /// Drop every stored key
    pub async fn reset(&self) -> Result<(), SecretStoreError> {
        self.store.clear_all().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::secret_store::MemorySecretStore;

    #[tokio::test]
    async fn test_missing_account_is_none() {
        let keys = IdentityKeyStore::new(MemorySecretStore::new());
        assert!(keys.load_or_none("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_generate_then_load() {
        let keys = IdentityKeyStore::new(MemorySecretStore::new());
        let generated = keys.generate_and_persist("alice").await.unwrap();
        let loaded = keys.load_or_none("alice").await.unwrap().unwrap();
        assert_eq!(generated, loaded);
    }

    #[tokio::test]
    async fn test_wrong_length_is_corrupt() {
        let secrets = MemorySecretStore::new();
        secrets.put("alice", &[1u8; 16]).await.unwrap();
        let keys = IdentityKeyStore::new(secrets);

        assert_eq!(
            keys.load_or_none("alice").await,
            Err(SecretStoreError::CorruptEntry("alice".to_string()))
        );
    }

    #[tokio::test]
    async fn test_locked_store_surfaces_access_denied() {
        let secrets = MemorySecretStore::new();
        let keys = IdentityKeyStore::new(secrets.clone());
        secrets.lock();

        assert!(matches!(
            keys.generate_and_persist("alice").await,
            Err(SecretStoreError::AccessDenied(_))
        ));
    }
}
