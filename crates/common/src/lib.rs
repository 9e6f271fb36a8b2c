/**
 * Local cache of directory records.
 *  One repository per record type, keyed by
 *  stable ids, merged into idempotently.
 */
pub mod cache;
/**
 * Cryptographic types and operations.
 *  - X25519 identity keys
 *  - Envelope encryption of message bodies
 */
pub mod crypto;
/**
 * Persisted bookmark into the remote change history.
 */
pub mod cursor;
/**
 * The remote directory service, its change log
 *  types and an in-process implementation.
 */
pub mod directory;
/**
 * Generates and loads a device's identity key
 *  on top of a secret store.
 */
pub mod identity_keys;
/**
 * Serialized background queue for reconcile
 *  and provisioning work.
 */
pub mod jobs;
/**
 * Message send and receive path.
 */
pub mod mailbox;
/**
 * Records shared between the cache and the directory.
 */
pub mod model;
/**
 * Race-free, one-time provisioning of a device's
 *  identity key.
 */
pub mod provision;
/**
 * Incremental, resumable sync of the local cache
 *  against the remote directory.
 */
pub mod reconcile;
/**
 * Account-keyed storage for raw key bytes.
 */
pub mod secret_store;
/**
 * Helper for reporting build version information.
 */
pub mod version;

pub mod prelude {
    pub use crate::cache::{LocalCache, MemoryCache};
    pub use crate::crypto::{EnvelopeCrypto, EnvelopeError, PrivateKey, PublicKey};
    pub use crate::cursor::{ChangeCursor, CursorStore, FileCursorStore};
    pub use crate::directory::{MemoryDirectory, RemoteDirectory};
    pub use crate::identity_keys::IdentityKeyStore;
    pub use crate::jobs::{Job, JobDispatcher, JobReceiver};
    pub use crate::mailbox::{Mailbox, MailboxError};
    pub use crate::model::{Identity, Message, RemoteId, RemoteIdentity};
    pub use crate::provision::{KeyProvisioningService, ProvisionError, Provisioned};
    pub use crate::reconcile::{ChangeReconciler, ReconcileError};
    pub use crate::secret_store::{FileSecretStore, MemorySecretStore, SecretStore};
    pub use crate::version::build_info;
}
