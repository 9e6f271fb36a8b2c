use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{SecretStore, SecretStoreError};
use crate::crypto::PRIVATE_KEY_PEM_TAG;

const ENTRY_EXTENSION: &str = "pem";
/// Longest hex-encoded account kept verbatim in a file name
const MAX_ENCODED_ACCOUNT_LEN: usize = 200;

/// Secret store backed by one PEM file per account
///
/// Files live in a single directory readable only by the current user
/// (mode 0700 for the directory, 0600 for entries on unix). Account names
/// are hex encoded into file names so any account string is a valid path
/// component. Writes go through a temp file and an atomic rename.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SecretStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        restrict_permissions(&root, 0o700)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, account: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", entry_stem(account), ENTRY_EXTENSION))
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, SecretStoreError>
    where
        F: FnOnce(&FileSecretStore) -> Result<T, SecretStoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| SecretStoreError::Storage(format!("secret store task failed: {}", e)))?
    }

    fn put_sync(&self, account: &str, key_bytes: &[u8]) -> Result<(), SecretStoreError> {
        let encoded = pem::encode(&pem::Pem::new(PRIVATE_KEY_PEM_TAG, key_bytes.to_vec()));

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        restrict_permissions(tmp.path(), 0o600)?;
        tmp.write_all(encoded.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(account))
            .map_err(|e| SecretStoreError::from(e.error))?;
        Ok(())
    }

    fn get_sync(&self, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        let contents = match fs::read_to_string(self.entry_path(account)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(SecretStoreError::CorruptEntry(account.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let parsed =
            pem::parse(contents).map_err(|_| SecretStoreError::CorruptEntry(account.to_string()))?;
        if parsed.tag() != PRIVATE_KEY_PEM_TAG {
            return Err(SecretStoreError::CorruptEntry(account.to_string()));
        }
        Ok(Some(parsed.into_contents()))
    }

    fn delete_sync(&self, account: &str) -> Result<(), SecretStoreError> {
        match fs::remove_file(self.entry_path(account)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_all_sync(&self) -> Result<(), SecretStoreError> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// File name stem for `account`: its hex encoding, or a SHA-256 digest when
/// that would overflow the file name limit
fn entry_stem(account: &str) -> String {
    let encoded = hex::encode(account.as_bytes());
    if encoded.len() <= MAX_ENCODED_ACCOUNT_LEN {
        return encoded;
    }
    format!("sha256-{}", hex::encode(Sha256::digest(account.as_bytes())))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<(), SecretStoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<(), SecretStoreError> {
    Ok(())
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn put(&self, account: &str, key_bytes: &[u8]) -> Result<(), SecretStoreError> {
        let account = account.to_string();
        let key_bytes = zeroize::Zeroizing::new(key_bytes.to_vec());
        self.blocking(move |store| store.put_sync(&account, &key_bytes))
            .await
    }

    async fn get(&self, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        let account = account.to_string();
        self.blocking(move |store| store.get_sync(&account)).await
    }

    async fn delete(&self, account: &str) -> Result<(), SecretStoreError> {
        let account = account.to_string();
        self.blocking(move |store| store.delete_sync(&account)).await
    }

    async fn clear_all(&self) -> Result<(), SecretStoreError> {
        self.blocking(|store| store.clear_all_sync()).await
    }
}
