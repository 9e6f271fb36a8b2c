//! Shared test utilities for reconcile and provisioning integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use common::cache::{CacheError, LocalCache, MemoryCache, ProvisionedRecords};
use common::crypto::PrivateKey;
use common::cursor::{ChangeCursor, CursorStore};
use common::directory::{
    ChangeTransaction, DirectoryError, MemoryDirectory, Publication, RecordChange,
    RemoteDirectory,
};
use common::identity_keys::IdentityKeyStore;
use common::model::{Identity, Message, PrivateKeyRecord, PublicKeyRecord, RemoteId, RemoteIdentity};
use common::provision::KeyProvisioningService;
use common::reconcile::ChangeReconciler;
use common::secret_store::MemorySecretStore;

pub type Device<D, K> = KeyProvisioningService<D, MemoryCache, K, MemorySecretStore>;

/// A device with its own cache, cursor and secret store
pub fn device<D, K>(directory: D, cursors: K) -> (Device<D, K>, MemoryCache, MemorySecretStore)
where
    D: RemoteDirectory,
    K: CursorStore,
{
    let cache = MemoryCache::new();
    let secrets = MemorySecretStore::new();
    let reconciler = ChangeReconciler::new(directory, cache.clone(), cursors);
    let provisioner =
        KeyProvisioningService::new(Arc::new(reconciler), IdentityKeyStore::new(secrets.clone()));
    (provisioner, cache, secrets)
}

pub fn identity(id: &str) -> Identity {
    Identity {
        id: RemoteId::new(id),
        display_name: id.to_string(),
        public_key: PrivateKey::generate().unwrap().public(),
        created_at: Utc::now(),
    }
}

pub fn public_key_record(owner: &Identity) -> PublicKeyRecord {
    PublicKeyRecord {
        id: Uuid::new_v4(),
        key: owner.public_key,
        owner_identity_id: owner.id.clone(),
    }
}

pub fn message(to: &Identity, sender_key: &PublicKeyRecord) -> Message {
    Message {
        id: Uuid::new_v4(),
        sender_public_key_ref: sender_key.id,
        recipient_identity_ref: to.id.clone(),
        ciphertext: vec![0xAB; 40],
        sent_at: Utc::now(),
    }
}

/// Fault injected into the next `commit_provisioned`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFault {
    DiskFull,
    Conflict,
}

/// Cache that can be told to fail applying one particular transaction
#[derive(Debug, Clone, Default)]
pub struct FlakyCache {
    pub inner: MemoryCache,
    fail_at: Arc<Mutex<Option<ChangeCursor>>>,
    signal_after: Arc<Mutex<Option<(ChangeCursor, watch::Sender<()>)>>>,
    commit_fault: Arc<Mutex<Option<CommitFault>>>,
    applies: Arc<AtomicUsize>,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_at(&self, cursor: Option<ChangeCursor>) {
        *self.fail_at.lock() = cursor;
    }

    /// Fire `signal` once the transaction at `cursor` has been applied
    pub fn signal_after(&self, cursor: ChangeCursor, signal: watch::Sender<()>) {
        *self.signal_after.lock() = Some((cursor, signal));
    }

    /// Make the next `commit_provisioned` fail without writing anything
    pub fn fail_next_commit(&self, fault: CommitFault) {
        *self.commit_fault.lock() = Some(fault);
    }

    /// Successful `apply` calls so far
    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalCache for FlakyCache {
    async fn identity(&self, id: &RemoteId) -> Result<Option<Identity>, CacheError> {
        self.inner.identity(id).await
    }

    async fn public_key(&self, id: Uuid) -> Result<Option<PublicKeyRecord>, CacheError> {
        self.inner.public_key(id).await
    }

    async fn public_keys_for(
        &self,
        identity: &RemoteId,
    ) -> Result<Vec<PublicKeyRecord>, CacheError> {
        self.inner.public_keys_for(identity).await
    }

    async fn private_key(&self, owner: &RemoteId) -> Result<Option<PrivateKeyRecord>, CacheError> {
        self.inner.private_key(owner).await
    }

    async fn messages_for(&self, recipient: &RemoteId) -> Result<Vec<Message>, CacheError> {
        self.inner.messages_for(recipient).await
    }

    async fn commit_provisioned(&self, records: ProvisionedRecords) -> Result<(), CacheError> {
        let fault = self.commit_fault.lock().take();
        match fault {
            Some(CommitFault::DiskFull) => Err(anyhow::anyhow!("disk full").into()),
            Some(CommitFault::Conflict) => {
                Err(CacheError::SaveConflict(records.identity.id.clone()))
            }
            None => self.inner.commit_provisioned(records).await,
        }
    }

    async fn apply(&self, transaction: &ChangeTransaction) -> Result<(), CacheError> {
        if *self.fail_at.lock() == Some(transaction.cursor) {
            return Err(anyhow::anyhow!("disk full").into());
        }
        self.inner.apply(transaction).await?;
        self.applies.fetch_add(1, Ordering::SeqCst);

        let mut signal = self.signal_after.lock();
        if signal.as_ref().map(|(cursor, _)| *cursor) == Some(transaction.cursor) {
            if let Some((_, tx)) = signal.take() {
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), CacheError> {
        self.inner.clear_all().await
    }
}

/// Directory handle with injectable publish outages and replication lag
#[derive(Debug, Clone)]
pub struct FlakyDirectory {
    pub inner: MemoryDirectory,
    publish_down: Arc<AtomicBool>,
    lag_once: Arc<AtomicBool>,
}

impl FlakyDirectory {
    pub fn new(inner: MemoryDirectory) -> Self {
        Self {
            inner,
            publish_down: Arc::new(AtomicBool::new(false)),
            lag_once: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make `publish` fail while everything else keeps working
    pub fn set_publish_down(&self, down: bool) {
        self.publish_down.store(down, Ordering::SeqCst);
    }

    /// The next `changes_since` sees nothing new, as if replication lagged
    pub fn lag_next_fetch(&self) {
        self.lag_once.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteDirectory for FlakyDirectory {
    async fn resolve_current_user(&self) -> Result<RemoteIdentity, DirectoryError> {
        self.inner.resolve_current_user().await
    }

    async fn lookup_identity(
        &self,
        record_id: &RemoteId,
    ) -> Result<Option<Identity>, DirectoryError> {
        self.inner.lookup_identity(record_id).await
    }

    async fn changes_since(
        &self,
        since: ChangeCursor,
        limit: usize,
    ) -> Result<Vec<ChangeTransaction>, DirectoryError> {
        if self.lag_once.swap(false, Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.changes_since(since, limit).await
    }

    async fn publish(&self, publication: Publication) -> Result<ChangeCursor, DirectoryError> {
        if self.publish_down.load(Ordering::SeqCst) {
            return Err(DirectoryError::RemoteUnavailable(
                "publish endpoint offline".to_string(),
            ));
        }
        self.inner.publish(publication).await
    }
}

pub fn upsert_identity(identity: &Identity) -> RecordChange {
    RecordChange::UpsertIdentity(identity.clone())
}
