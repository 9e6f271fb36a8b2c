use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{CacheError, LocalCache, ProvisionedRecords};
use crate::directory::{ChangeTransaction, RecordChange};
use crate::model::{Identity, Message, PrivateKeyRecord, PublicKeyRecord, RemoteId};

/// In-memory local cache using HashMaps
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<MemoryCacheInner>>,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    identities: HashMap<RemoteId, Identity>,
    /// id -> (insertion sequence, record)
    public_keys: HashMap<Uuid, (u64, PublicKeyRecord)>,
    private_keys: HashMap<RemoteId, PrivateKeyRecord>,
    messages: HashMap<Uuid, Message>,
    next_seq: u64,
}

impl MemoryCacheInner {
    fn merge(&mut self, change: &RecordChange) {
        match change {
            RecordChange::UpsertIdentity(incoming) => match self.identities.get_mut(&incoming.id) {
                Some(existing) => {
                    if existing.public_key != incoming.public_key {
                        tracing::warn!(
                            "ignoring public key change on immutable identity {}",
                            incoming.id
                        );
                    }
                    existing.display_name = incoming.display_name.clone();
                }
                None => {
                    self.identities.insert(incoming.id.clone(), incoming.clone());
                }
            },
            RecordChange::UpsertPublicKey(incoming) => match self.public_keys.get(&incoming.id) {
                Some((_, existing)) => {
                    if existing.key != incoming.key {
                        tracing::warn!("ignoring rewrite of public key record {}", incoming.id);
                    }
                }
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.public_keys
                        .insert(incoming.id, (seq, incoming.clone()));
                }
            },
            RecordChange::UpsertPrivateKey(incoming) => {
                match self.private_keys.get(&incoming.owner_id) {
                    Some(existing) => {
                        if existing.key_bytes != incoming.key_bytes {
                            tracing::warn!(
                                "keeping first private key for {}, ignoring later one",
                                incoming.owner_id
                            );
                        }
                    }
                    None => {
                        self.private_keys
                            .insert(incoming.owner_id.clone(), incoming.clone());
                    }
                }
            }
            RecordChange::AppendMessage(message) => {
                self.messages
                    .entry(message.id)
                    .or_insert_with(|| message.clone());
            }
            RecordChange::DeleteIdentity(id) => {
                self.identities.remove(id);
            }
            RecordChange::DeletePublicKey(id) => {
                self.public_keys.remove(id);
            }
            RecordChange::DeleteMessage(id) => {
                self.messages.remove(id);
            }
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryCacheInner>, CacheError> {
        self.inner
            .read()
            .map_err(|e| anyhow::anyhow!("failed to acquire read lock: {}", e).into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryCacheInner>, CacheError> {
        self.inner
            .write()
            .map_err(|e| anyhow::anyhow!("failed to acquire write lock: {}", e).into())
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn identity(&self, id: &RemoteId) -> Result<Option<Identity>, CacheError> {
        Ok(self.read()?.identities.get(id).cloned())
    }

    async fn public_key(&self, id: Uuid) -> Result<Option<PublicKeyRecord>, CacheError> {
        Ok(self
            .read()?
            .public_keys
            .get(&id)
            .map(|(_, record)| record.clone()))
    }

    async fn public_keys_for(
        &self,
        identity: &RemoteId,
    ) -> Result<Vec<PublicKeyRecord>, CacheError> {
        let inner = self.read()?;
        let mut records: Vec<_> = inner
            .public_keys
            .values()
            .filter(|(_, record)| &record.owner_identity_id == identity)
            .cloned()
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    async fn private_key(&self, owner: &RemoteId) -> Result<Option<PrivateKeyRecord>, CacheError> {
        Ok(self.read()?.private_keys.get(owner).cloned())
    }

    async fn messages_for(&self, recipient: &RemoteId) -> Result<Vec<Message>, CacheError> {
        let inner = self.read()?;
        let mut messages: Vec<_> = inner
            .messages
            .values()
            .filter(|message| &message.recipient_identity_ref == recipient)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn commit_provisioned(&self, records: ProvisionedRecords) -> Result<(), CacheError> {
        let mut inner = self.write()?;
        let owner = records.private_key.owner_id.clone();
        if inner.private_keys.contains_key(&owner) {
            return Err(CacheError::SaveConflict(owner));
        }

        inner.private_keys.insert(owner, records.private_key);
        inner
            .identities
            .insert(records.identity.id.clone(), records.identity);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .public_keys
            .insert(records.public_key.id, (seq, records.public_key));
        Ok(())
    }

    async fn apply(&self, transaction: &ChangeTransaction) -> Result<(), CacheError> {
        let mut inner = self.write()?;
        for change in &transaction.changes {
            inner.merge(change);
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), CacheError> {
        *self.write()? = MemoryCacheInner::default();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::cursor::ChangeCursor;
    use chrono::Utc;

    fn identity(id: &str, name: &str) -> Identity {
        Identity {
            id: RemoteId::new(id),
            display_name: name.to_string(),
            public_key: PrivateKey::generate().unwrap().public(),
            created_at: Utc::now(),
        }
    }

    fn transaction(position: u64, changes: Vec<RecordChange>) -> ChangeTransaction {
        ChangeTransaction {
            cursor: ChangeCursor::new(position),
            changes,
        }
    }

    #[tokio::test]
    async fn test_identity_only_display_name_changes() {
        let cache = MemoryCache::new();
        let original = identity("alice", "Alice");
        cache
            .apply(&transaction(1, vec![RecordChange::UpsertIdentity(original.clone())]))
            .await
            .unwrap();

        let mut renamed = identity("alice", "Alice L.");
        renamed.created_at = original.created_at;
        cache
            .apply(&transaction(2, vec![RecordChange::UpsertIdentity(renamed)]))
            .await
            .unwrap();

        let stored = cache.identity(&RemoteId::new("alice")).await.unwrap().unwrap();
        assert_eq!(stored.display_name, "Alice L.");
        assert_eq!(stored.public_key, original.public_key);
    }

    #[tokio::test]
    async fn test_apply_twice_is_noop() {
        let cache = MemoryCache::new();
        let alice = identity("alice", "Alice");
        let record = PublicKeyRecord {
            id: Uuid::new_v4(),
            key: alice.public_key,
            owner_identity_id: alice.id.clone(),
        };
        let t = transaction(
            1,
            vec![
                RecordChange::UpsertIdentity(alice.clone()),
                RecordChange::UpsertPublicKey(record.clone()),
            ],
        );

        cache.apply(&t).await.unwrap();
        cache.apply(&t).await.unwrap();

        assert_eq!(cache.identity(&alice.id).await.unwrap(), Some(alice.clone()));
        assert_eq!(cache.public_keys_for(&alice.id).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_private_key_first_writer_wins() {
        let cache = MemoryCache::new();
        let owner = RemoteId::new("alice");
        let first = PrivateKeyRecord {
            owner_id: owner.clone(),
            key_bytes: [1; 32],
        };
        let second = PrivateKeyRecord {
            owner_id: owner.clone(),
            key_bytes: [2; 32],
        };

        cache
            .apply(&transaction(1, vec![RecordChange::UpsertPrivateKey(first.clone())]))
            .await
            .unwrap();
        cache
            .apply(&transaction(2, vec![RecordChange::UpsertPrivateKey(second)]))
            .await
            .unwrap();

        assert_eq!(cache.private_key(&owner).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_commit_provisioned_conflicts_on_existing_key() {
        let cache = MemoryCache::new();
        let alice = identity("alice", "Alice");
        let records = ProvisionedRecords {
            private_key: PrivateKeyRecord {
                owner_id: alice.id.clone(),
                key_bytes: [3; 32],
            },
            identity: alice.clone(),
            public_key: PublicKeyRecord {
                id: Uuid::new_v4(),
                key: alice.public_key,
                owner_identity_id: alice.id.clone(),
            },
        };

        cache.commit_provisioned(records.clone()).await.unwrap();
        let again = cache.commit_provisioned(records).await;
        assert!(matches!(again, Err(CacheError::SaveConflict(owner)) if owner == alice.id));
    }

    #[tokio::test]
    async fn test_deletes_are_idempotent() {
        let cache = MemoryCache::new();
        let alice = identity("alice", "Alice");
        cache
            .apply(&transaction(1, vec![RecordChange::UpsertIdentity(alice.clone())]))
            .await
            .unwrap();

        let delete = transaction(2, vec![RecordChange::DeleteIdentity(alice.id.clone())]);
        cache.apply(&delete).await.unwrap();
        cache.apply(&delete).await.unwrap();
        assert_eq!(cache.identity(&alice.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_all_drops_private_keys() {
        let cache = MemoryCache::new();
        let owner = RemoteId::new("alice");
        cache
            .apply(&transaction(
                1,
                vec![RecordChange::UpsertPrivateKey(PrivateKeyRecord {
                    owner_id: owner.clone(),
                    key_bytes: [1; 32],
                })],
            ))
            .await
            .unwrap();

        cache.clear_all().await.unwrap();
        assert_eq!(cache.private_key(&owner).await.unwrap(), None);
    }
}
