use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ChangeTransaction, DirectoryError, Publication, RecordChange, RemoteDirectory};
use crate::cursor::ChangeCursor;
use crate::model::{Identity, RemoteId, RemoteIdentity};

/// In-process remote directory with an ordered change log
///
/// One `MemoryDirectory::new()` is the shared backend; `connect` hands out
/// per-user handles that see the same history. Private key changes are
/// filtered out of the history for everyone but their owner.
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    inner: Arc<RwLock<MemoryDirectoryInner>>,
    viewer: Option<RemoteIdentity>,
}

#[derive(Debug)]
struct MemoryDirectoryInner {
    /// Ordered history, cursors strictly increasing
    log: Vec<ChangeTransaction>,
    /// Latest published identity per record id
    identities: HashMap<RemoteId, Identity>,
    /// Owners that already have a private key record
    key_owners: HashSet<RemoteId>,
    /// Last cursor handed out
    head: u64,
    available: bool,
    publications: usize,
}

impl Default for MemoryDirectoryInner {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            identities: HashMap::new(),
            key_owners: HashSet::new(),
            head: 0,
            available: true,
            publications: 0,
        }
    }
}

impl MemoryDirectoryInner {
    fn append(&mut self, changes: Vec<RecordChange>) -> ChangeCursor {
        for change in &changes {
            match change {
                RecordChange::UpsertIdentity(identity) => {
                    self.identities.insert(identity.id.clone(), identity.clone());
                }
                RecordChange::DeleteIdentity(id) => {
                    self.identities.remove(id);
                }
                RecordChange::UpsertPrivateKey(record) => {
                    self.key_owners.insert(record.owner_id.clone());
                }
                _ => {}
            }
        }

        self.head += 1;
        let cursor = ChangeCursor::new(self.head);
        self.log.push(ChangeTransaction { cursor, changes });
        cursor
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryDirectoryInner::default())),
            viewer: None,
        }
    }

    /// A handle on the same backend, signed in as `user`
    pub fn connect(&self, user: RemoteIdentity) -> Self {
        Self {
            inner: self.inner.clone(),
            viewer: Some(user),
        }
    }

    /// Simulate the directory going offline (or coming back)
    pub fn set_available(&self, available: bool) {
        self.inner.write().available = available;
    }

    /// Append an arbitrary transaction, as if another client wrote it
    pub fn record(&self, changes: Vec<RecordChange>) -> ChangeCursor {
        self.inner.write().append(changes)
    }

    /// Number of successful `publish` calls
    pub fn publications(&self) -> usize {
        self.inner.read().publications
    }

    /// Cursor of the newest transaction
    pub fn head(&self) -> ChangeCursor {
        ChangeCursor::new(self.inner.read().head)
    }

    fn check_available(&self) -> Result<(), DirectoryError> {
        if !self.inner.read().available {
            return Err(DirectoryError::RemoteUnavailable(
                "memory directory is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn visible_to_viewer(&self, change: &RecordChange) -> bool {
        match change {
            RecordChange::UpsertPrivateKey(record) => self
                .viewer
                .as_ref()
                .map(|viewer| viewer.record_id == record.owner_id)
                .unwrap_or(false),
            _ => true,
        }
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteDirectory for MemoryDirectory {
    async fn resolve_current_user(&self) -> Result<RemoteIdentity, DirectoryError> {
        self.check_available()?;
        self.viewer
            .clone()
            .ok_or_else(|| DirectoryError::RemoteUnavailable("no signed-in user".to_string()))
    }

    async fn lookup_identity(
        &self,
        record_id: &RemoteId,
    ) -> Result<Option<Identity>, DirectoryError> {
        self.check_available()?;
        Ok(self.inner.read().identities.get(record_id).cloned())
    }

    async fn changes_since(
        &self,
        since: ChangeCursor,
        limit: usize,
    ) -> Result<Vec<ChangeTransaction>, DirectoryError> {
        self.check_available()?;
        let inner = self.inner.read();
        Ok(inner
            .log
            .iter()
            .filter(|transaction| transaction.cursor > since)
            .take(limit)
            .map(|transaction| ChangeTransaction {
                cursor: transaction.cursor,
                changes: transaction
                    .changes
                    .iter()
                    .filter(|change| self.visible_to_viewer(change))
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    async fn publish(&self, publication: Publication) -> Result<ChangeCursor, DirectoryError> {
        self.check_available()?;
        let mut inner = self.inner.write();

        let owner = publication.owner().clone();
        if inner.key_owners.contains(&owner) {
            return Err(DirectoryError::SaveConflict(owner));
        }

        let cursor = inner.append(publication.into_changes());
        inner.publications += 1;
        Ok(cursor)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::model::{PrivateKeyRecord, PublicKeyRecord};
    use chrono::Utc;
    use uuid::Uuid;

    fn publication(owner: &str) -> Publication {
        let key = PrivateKey::generate().unwrap();
        let id = RemoteId::new(owner);
        Publication {
            identity: Identity {
                id: id.clone(),
                display_name: owner.to_string(),
                public_key: key.public(),
                created_at: Utc::now(),
            },
            public_key: PublicKeyRecord {
                id: Uuid::new_v4(),
                key: key.public(),
                owner_identity_id: id.clone(),
            },
            private_key: PrivateKeyRecord {
                owner_id: id,
                key_bytes: key.to_bytes(),
            },
        }
    }

    #[tokio::test]
    async fn test_publish_first_writer_wins() {
        let directory = MemoryDirectory::new();
        directory.publish(publication("alice")).await.unwrap();

        let second = directory.publish(publication("alice")).await;
        assert_eq!(second, Err(DirectoryError::SaveConflict(RemoteId::new("alice"))));
        assert_eq!(directory.publications(), 1);
    }

    #[tokio::test]
    async fn test_changes_since_is_strict_and_limited() {
        let directory = MemoryDirectory::new();
        let first = directory.record(vec![]);
        let second = directory.record(vec![]);
        let third = directory.record(vec![]);

        let all = directory
            .changes_since(ChangeCursor::BEGINNING, 10)
            .await
            .unwrap();
        let cursors: Vec<_> = all.iter().map(|t| t.cursor).collect();
        assert_eq!(cursors, vec![first, second, third]);

        let after_first = directory.changes_since(first, 1).await.unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].cursor, second);

        assert!(directory.changes_since(third, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_private_keys_only_visible_to_owner() {
        let backend = MemoryDirectory::new();
        let alice = backend.connect(RemoteIdentity::new("alice"));
        let bob = backend.connect(RemoteIdentity::new("bob"));
        alice.publish(publication("alice")).await.unwrap();

        let seen_by_alice = alice
            .changes_since(ChangeCursor::BEGINNING, 10)
            .await
            .unwrap();
        assert_eq!(seen_by_alice[0].changes.len(), 3);

        let seen_by_bob = bob.changes_since(ChangeCursor::BEGINNING, 10).await.unwrap();
        assert_eq!(seen_by_bob[0].changes.len(), 2);
        assert!(seen_by_bob[0]
            .changes
            .iter()
            .all(|change| !matches!(change, RecordChange::UpsertPrivateKey(_))));

        let identity = bob.lookup_identity(&RemoteId::new("alice")).await.unwrap();
        assert!(identity.is_some());
    }

    #[tokio::test]
    async fn test_offline_directory_is_unavailable() {
        let directory = MemoryDirectory::new().connect(RemoteIdentity::new("alice"));
        directory.set_available(false);

        assert!(matches!(
            directory.resolve_current_user().await,
            Err(DirectoryError::RemoteUnavailable(_))
        ));
        assert!(matches!(
            directory.changes_since(ChangeCursor::BEGINNING, 10).await,
            Err(DirectoryError::RemoteUnavailable(_))
        ));

        directory.set_available(true);
        assert_eq!(
            directory.resolve_current_user().await.unwrap().record_id,
            RemoteId::new("alice")
        );
    }
}
