use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cursor::ChangeCursor;
use crate::model::{Identity, Message, PrivateKeyRecord, PublicKeyRecord, RemoteId, RemoteIdentity};

mod memory;

pub use memory::MemoryDirectory;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The directory could not be reached; safe to retry
    #[error("remote directory unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("record not found: {0}")]
    RecordNotFound(RemoteId),
    /// Another writer already published an identity key for this owner
    #[error("save conflict for {0}")]
    SaveConflict(RemoteId),
}

/// A single record-level change in the remote history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordChange {
    UpsertIdentity(Identity),
    UpsertPublicKey(PublicKeyRecord),
    UpsertPrivateKey(PrivateKeyRecord),
    AppendMessage(Message),
    DeleteIdentity(RemoteId),
    DeletePublicKey(Uuid),
    DeleteMessage(Uuid),
}

/// An ordered group of changes committed together on the remote side
///
/// `cursor` is the position of this transaction in the history; once it is
/// applied, a cursor at this value covers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeTransaction {
    pub cursor: ChangeCursor,
    pub changes: Vec<RecordChange>,
}

/// Records published together when a device creates its identity key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub identity: Identity,
    pub public_key: PublicKeyRecord,
    /// Goes to the owner's private scope only
    pub private_key: PrivateKeyRecord,
}

impl Publication {
    pub fn owner(&self) -> &RemoteId {
        &self.identity.id
    }

    pub(crate) fn into_changes(self) -> Vec<RecordChange> {
        vec![
            RecordChange::UpsertPrivateKey(self.private_key),
            RecordChange::UpsertIdentity(self.identity),
            RecordChange::UpsertPublicKey(self.public_key),
        ]
    }
}

/// The remote directory service, as seen by one signed-in client
#[async_trait]
pub trait RemoteDirectory: Send + Sync + Debug + Clone + 'static {
    /// Resolve the user this client is signed in as
    async fn resolve_current_user(&self) -> Result<RemoteIdentity, DirectoryError>;

    /// Look up a published identity by record id
    async fn lookup_identity(&self, record_id: &RemoteId)
        -> Result<Option<Identity>, DirectoryError>;

    /// Fetch transactions strictly after `since`, oldest first
    ///
    /// # Arguments
    /// * `since` - The last cursor this client has applied
    /// * `limit` - Maximum number of transactions to return
    async fn changes_since(
        &self,
        since: ChangeCursor,
        limit: usize,
    ) -> Result<Vec<ChangeTransaction>, DirectoryError>;

    /// Publish a freshly provisioned identity as one transaction
    ///
    /// Should fail with `DirectoryError::SaveConflict` when a private key
    /// record already exists for the owner: the first writer wins.
    async fn publish(&self, publication: Publication) -> Result<ChangeCursor, DirectoryError>;
}
