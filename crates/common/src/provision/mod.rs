//! One-time identity key provisioning
//!
//! For a remote identity the service makes sure exactly one private key and
//! identity pair exists, across concurrent callers on this device and
//! across devices racing through the remote directory:
//!
//!  Unresolved -> Reconciling -> Found ------------> Ready
//!                            \-> Generating ------> Ready
//!
//! Concurrent calls for the same remote id share one in-flight task. Two
//! devices that both generate end in a save conflict on the directory; the
//! loser discards its key and adopts the one that was published first.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::task::JoinError;
use uuid::Uuid;

use crate::cache::{CacheError, LocalCache, ProvisionedRecords};
use crate::crypto::PrivateKey;
use crate::cursor::CursorStore;
use crate::directory::{DirectoryError, Publication, RemoteDirectory};
use crate::identity_keys::IdentityKeyStore;
use crate::model::{Identity, PrivateKeyRecord, PublicKeyRecord, RemoteId, RemoteIdentity};
use crate::reconcile::{ChangeReconciler, ReconcileError};
use crate::secret_store::{SecretStore, SecretStoreError};

mod single_flight;

use single_flight::SingleFlight;

/// Where provisioning for a remote id currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionState {
    Unresolved,
    Reconciling,
    Found,
    Generating,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    /// The directory could not be reached; safe to retry
    #[error("remote directory unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("secret store access denied: {0}")]
    AccessDenied(String),
    #[error("corrupt secret store entry: {0}")]
    CorruptEntry(String),
    #[error("persisted change cursor is corrupt: {0}")]
    CursorCorrupt(String),
    /// Reconciliation failed writing to the cache; safe to retry
    #[error("failed to apply remote changes: {0}")]
    ApplyFailure(String),
    /// Published, but the local cache write failed; safe to retry
    #[error("failed to commit provisioned key locally: {0}")]
    LocalCommit(String),
    #[error("record not found: {0}")]
    RecordNotFound(RemoteId),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("provisioning task failed: {0}")]
    TaskFailed(String),
}

impl ProvisionError {
    /// Whether retrying later can succeed without user intervention
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisionError::RemoteUnavailable(_)
                | ProvisionError::ApplyFailure(_)
                | ProvisionError::LocalCommit(_)
        )
    }
}

impl From<ReconcileError> for ProvisionError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::RemoteUnavailable(reason) => ProvisionError::RemoteUnavailable(reason),
            ReconcileError::ApplyFailure { .. } => ProvisionError::ApplyFailure(err.to_string()),
            ReconcileError::CursorCorrupt(reason) => ProvisionError::CursorCorrupt(reason),
            ReconcileError::CursorStorage(reason) => ProvisionError::Storage(reason),
            ReconcileError::Cancelled => ProvisionError::TaskFailed(err.to_string()),
            ReconcileError::ResetFailed(reason) => ProvisionError::Storage(reason),
        }
    }
}

impl From<SecretStoreError> for ProvisionError {
    fn from(err: SecretStoreError) -> Self {
        match err {
            SecretStoreError::AccessDenied(reason) => ProvisionError::AccessDenied(reason),
            SecretStoreError::CorruptEntry(account) => ProvisionError::CorruptEntry(account),
            SecretStoreError::Storage(reason) => ProvisionError::Storage(reason),
        }
    }
}

impl From<DirectoryError> for ProvisionError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::RecordNotFound(id) => ProvisionError::RecordNotFound(id),
            other => ProvisionError::RemoteUnavailable(other.to_string()),
        }
    }
}

impl From<CacheError> for ProvisionError {
    fn from(err: CacheError) -> Self {
        ProvisionError::Storage(err.to_string())
    }
}

impl From<JoinError> for ProvisionError {
    fn from(err: JoinError) -> Self {
        ProvisionError::TaskFailed(err.to_string())
    }
}

/// A device's provisioned identity key and the records it is published as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub private_key: PrivateKey,
    pub identity: Identity,
    pub public_key: PublicKeyRecord,
}

/// Ensures a single identity key exists per remote id
pub struct KeyProvisioningService<D, C, K, S>
where
    D: RemoteDirectory,
    C: LocalCache,
    K: CursorStore,
    S: SecretStore,
{
    reconciler: Arc<ChangeReconciler<D, C, K>>,
    keys: IdentityKeyStore<S>,
    flights: SingleFlight<RemoteId, Provisioned, ProvisionError>,
    states: Arc<RwLock<HashMap<RemoteId, ProvisionState>>>,
}

impl<D, C, K, S> Clone for KeyProvisioningService<D, C, K, S>
where
    D: RemoteDirectory,
    C: LocalCache,
    K: CursorStore,
    S: SecretStore,
{
    fn clone(&self) -> Self {
        Self {
            reconciler: self.reconciler.clone(),
            keys: self.keys.clone(),
            flights: self.flights.clone(),
            states: self.states.clone(),
        }
    }
}

impl<D, C, K, S> std::fmt::Debug for KeyProvisioningService<D, C, K, S>
where
    D: RemoteDirectory,
    C: LocalCache,
    K: CursorStore,
    S: SecretStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyProvisioningService")
            .field("flights", &self.flights)
            .field("states", &*self.states.read())
            .finish()
    }
}

impl<D, C, K, S> KeyProvisioningService<D, C, K, S>
where
    D: RemoteDirectory,
    C: LocalCache,
    K: CursorStore,
    S: SecretStore,
{
    pub fn new(reconciler: Arc<ChangeReconciler<D, C, K>>, keys: IdentityKeyStore<S>) -> Self {
        Self {
            reconciler,
            keys,
            flights: SingleFlight::new(),
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn reconciler(&self) -> &Arc<ChangeReconciler<D, C, K>> {
        &self.reconciler
    }

    pub fn keys(&self) -> &IdentityKeyStore<S> {
        &self.keys
    }

    /// Last observed provisioning state for `id`
    pub fn state(&self, id: &RemoteId) -> ProvisionState {
        self.states
            .read()
            .get(id)
            .copied()
            .unwrap_or(ProvisionState::Unresolved)
    }

    /// Provision the user the directory says we are signed in as
    pub async fn fetch_or_create_current(&self) -> Result<Provisioned, ProvisionError> {
        let remote = self.reconciler.directory().resolve_current_user().await?;
        self.fetch_or_create(&remote).await
    }

    /// Return this device's key and identity for `remote`, creating them
    /// if no device has yet
    ///
    /// Concurrent calls for the same record id collapse into one run and
    /// all observe the same result.
    pub async fn fetch_or_create(
        &self,
        remote: &RemoteIdentity,
    ) -> Result<Provisioned, ProvisionError> {
        let this = self.clone();
        let remote = remote.clone();
        let key = remote.record_id.clone();
        self.flights
            .run(key, move || async move { this.provision(remote).await })
            .await
    }

    /// Full reset: drop the identity key, the cache and the cursor
    pub async fn reset(&self) -> Result<(), ProvisionError> {
        self.reconciler.reset().await?;
        self.keys.reset().await?;
        self.states.write().clear();
        tracing::info!("provisioning state reset");
        Ok(())
    }

    async fn provision(&self, remote: RemoteIdentity) -> Result<Provisioned, ProvisionError> {
        let owner = remote.record_id.clone();
        let result = self.provision_inner(&remote).await;
        match &result {
            Ok(_) => self.set_state(&owner, ProvisionState::Ready),
            Err(e) => {
                tracing::warn!("provisioning {} failed: {}", owner, e);
                self.set_state(&owner, ProvisionState::Unresolved);
            }
        }
        result
    }

    async fn provision_inner(&self, remote: &RemoteIdentity) -> Result<Provisioned, ProvisionError> {
        let owner = &remote.record_id;

        self.set_state(owner, ProvisionState::Reconciling);
        self.reconciler.reconcile().await?;

        if let Some(found) = self.load_cached(owner).await? {
            self.set_state(owner, ProvisionState::Found);
            self.mirror_to_secret_store(owner, &found.private_key)
                .await?;
            return Ok(found);
        }

        self.set_state(owner, ProvisionState::Generating);
        let (private_key, generated) = match self.keys.load_or_none(owner.as_str()).await? {
            Some(key) => {
                tracing::info!("reusing stored identity key for {}", owner);
                (key, false)
            }
            None => (self.keys.generate_and_persist(owner.as_str()).await?, true),
        };

        let public = private_key.public();
        let identity = Identity {
            id: owner.clone(),
            display_name: remote.display_name(),
            public_key: public,
            created_at: Utc::now(),
        };
        let public_key = PublicKeyRecord {
            id: Uuid::new_v4(),
            key: public,
            owner_identity_id: owner.clone(),
        };
        let private_record = PrivateKeyRecord {
            owner_id: owner.clone(),
            key_bytes: private_key.to_bytes(),
        };

        let publication = Publication {
            identity: identity.clone(),
            public_key: public_key.clone(),
            private_key: private_record.clone(),
        };
        match self.reconciler.directory().publish(publication).await {
            Ok(cursor) => {
                tracing::info!("published identity key for {} at {}", owner, cursor);
            }
            Err(DirectoryError::SaveConflict(_)) => return self.adopt_winner(owner).await,
            Err(e) => {
                if generated {
                    self.rollback(owner).await;
                }
                return Err(e.into());
            }
        }

        let records = ProvisionedRecords {
            private_key: private_record,
            identity: identity.clone(),
            public_key: public_key.clone(),
        };
        match self.reconciler.cache().commit_provisioned(records).await {
            Ok(()) => {}
            Err(CacheError::SaveConflict(_)) => return self.adopt_winner(owner).await,
            // the key is published and stays in the secret store; a retry
            // reconciles the published records back in and finds them
            Err(e) => {
                tracing::warn!("published key for {} but local commit failed: {}", owner, e);
                return Err(ProvisionError::LocalCommit(e.to_string()));
            }
        }

        Ok(Provisioned {
            private_key,
            identity,
            public_key,
        })
    }

    /// Read the provisioned records for `owner` out of the cache
    async fn load_cached(&self, owner: &RemoteId) -> Result<Option<Provisioned>, ProvisionError> {
        let cache = self.reconciler.cache();
        let Some(record) = cache.private_key(owner).await? else {
            return Ok(None);
        };
        let private_key = PrivateKey::from(record.key_bytes);
        let public = private_key.public();

        let identity = match cache.identity(owner).await? {
            Some(identity) => identity,
            None => self
                .reconciler
                .directory()
                .lookup_identity(owner)
                .await?
                .ok_or_else(|| ProvisionError::RecordNotFound(owner.clone()))?,
        };

        let public_key = cache
            .public_keys_for(owner)
            .await?
            .into_iter()
            .rev()
            .find(|record| record.key == public)
            .ok_or_else(|| ProvisionError::RecordNotFound(owner.clone()))?;

        Ok(Some(Provisioned {
            private_key,
            identity,
            public_key,
        }))
    }

    /// Another writer published first: take their key instead of ours
    async fn adopt_winner(&self, owner: &RemoteId) -> Result<Provisioned, ProvisionError> {
        tracing::warn!(
            "save conflict provisioning {}, adopting the already published key",
            owner
        );
        self.reconciler.reconcile().await?;
        let winner = self.load_cached(owner).await?.ok_or_else(|| {
            ProvisionError::RemoteUnavailable(format!(
                "winning identity key for {} is not visible yet",
                owner
            ))
        })?;
        self.keys.store(owner.as_str(), &winner.private_key).await?;
        Ok(winner)
    }

    /// Make sure the secret store holds the key the cache knows about
    async fn mirror_to_secret_store(
        &self,
        owner: &RemoteId,
        key: &PrivateKey,
    ) -> Result<(), ProvisionError> {
        if self.keys.load_or_none(owner.as_str()).await?.as_ref() != Some(key) {
            tracing::info!("restoring identity key for {} into the secret store", owner);
            self.keys.store(owner.as_str(), key).await?;
        }
        Ok(())
    }

    async fn rollback(&self, owner: &RemoteId) {
        if let Err(e) = self.keys.remove(owner.as_str()).await {
            tracing::error!("failed to roll back identity key for {}: {}", owner, e);
        }
    }

    fn set_state(&self, owner: &RemoteId, state: ProvisionState) {
        tracing::debug!("provisioning {} -> {:?}", owner, state);
        self.states.write().insert(owner.clone(), state);
    }
}
