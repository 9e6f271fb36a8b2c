use std::fmt::Debug;

use async_trait::async_trait;
use uuid::Uuid;

use crate::directory::ChangeTransaction;
use crate::model::{Identity, Message, PrivateKeyRecord, PublicKeyRecord, RemoteId};

mod memory;

pub use memory::MemoryCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A private key record already exists for this owner
    #[error("save conflict: a private key already exists for {0}")]
    SaveConflict(RemoteId),
    #[error("cache error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Records written together when a device provisions its identity key
///
/// Committed atomically: either all three land or none do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedRecords {
    pub private_key: PrivateKeyRecord,
    pub identity: Identity,
    pub public_key: PublicKeyRecord,
}

/// The local cache of directory records
///
/// Each record type is its own repository keyed by a stable id. Writes from
/// the remote side only arrive through [`LocalCache::apply`], which must be
/// idempotent: applying a transaction twice leaves the same state as
/// applying it once.
#[async_trait]
pub trait LocalCache: Send + Sync + Debug + Clone + 'static {
    async fn identity(&self, id: &RemoteId) -> Result<Option<Identity>, CacheError>;

    async fn public_key(&self, id: Uuid) -> Result<Option<PublicKeyRecord>, CacheError>;

    /// All public key records linked to an identity, oldest first
    async fn public_keys_for(&self, identity: &RemoteId)
        -> Result<Vec<PublicKeyRecord>, CacheError>;

    async fn private_key(&self, owner: &RemoteId) -> Result<Option<PrivateKeyRecord>, CacheError>;

    /// Messages addressed to an identity, oldest first
    async fn messages_for(&self, recipient: &RemoteId) -> Result<Vec<Message>, CacheError>;

    /// Atomically persist a freshly provisioned key and its identity
    ///
    /// Should fail with `CacheError::SaveConflict` if the owner already has
    /// a private key record; nothing is written in that case.
    async fn commit_provisioned(&self, records: ProvisionedRecords) -> Result<(), CacheError>;

    /// Merge one remote transaction into the cache, all or nothing
    ///
    /// Merge rules:
    /// * identities: insert, or update `display_name` only
    /// * public keys: insert if the id is new, bytes never change
    /// * private keys: insert if the owner has none, first writer wins
    /// * messages: insert if the id is new, never updated
    /// * deletes: remove if present
    async fn apply(&self, transaction: &ChangeTransaction) -> Result<(), CacheError>;

    /// Remove every record, private keys included
    async fn clear_all(&self) -> Result<(), CacheError>;
}
