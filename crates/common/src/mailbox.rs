use chrono::Utc;
use uuid::Uuid;

use crate::cache::{CacheError, LocalCache};
use crate::crypto::{EnvelopeCrypto, EnvelopeError, PrivateKey};
use crate::directory::{DirectoryError, RemoteDirectory};
use crate::model::{Identity, Message, RemoteId};
use crate::provision::Provisioned;

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error(transparent)]
    Crypto(#[from] EnvelopeError),
    #[error("record not found: {0}")]
    RecordNotFound(String),
    #[error("remote directory unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl From<DirectoryError> for MailboxError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::RecordNotFound(id) => MailboxError::RecordNotFound(id.to_string()),
            other => MailboxError::RemoteUnavailable(other.to_string()),
        }
    }
}

/// Send and receive path for encrypted messages
///
/// Message bodies are envelopes from [`EnvelopeCrypto`]; this layer only
/// resolves whose keys to use.
#[derive(Debug, Clone)]
pub struct Mailbox<D, C> {
    directory: D,
    cache: C,
}

impl<D, C> Mailbox<D, C>
where
    D: RemoteDirectory,
    C: LocalCache,
{
    pub fn new(directory: D, cache: C) -> Self {
        Self { directory, cache }
    }

    /// Resolve a recipient identity, cache first, then the directory
    pub async fn recipient(&self, id: &RemoteId) -> Result<Identity, MailboxError> {
        if let Some(identity) = self.cache.identity(id).await? {
            return Ok(identity);
        }
        self.directory
            .lookup_identity(id)
            .await?
            .ok_or_else(|| MailboxError::RecordNotFound(id.to_string()))
    }

    /// Encrypt `plaintext` from `sender` to `recipient` as a new message
    pub fn seal(
        &self,
        sender: &Provisioned,
        recipient: &Identity,
        plaintext: &[u8],
    ) -> Result<Message, MailboxError> {
        let ciphertext =
            EnvelopeCrypto::encrypt(plaintext, &sender.private_key, &recipient.public_key)?;
        Ok(Message {
            id: Uuid::new_v4(),
            sender_public_key_ref: sender.public_key.id,
            recipient_identity_ref: recipient.id.clone(),
            ciphertext,
            sent_at: Utc::now(),
        })
    }

    /// Decrypt a message addressed to the holder of `own`
    pub async fn open(&self, message: &Message, own: &PrivateKey) -> Result<Vec<u8>, MailboxError> {
        let sender = self
            .cache
            .public_key(message.sender_public_key_ref)
            .await?
            .ok_or_else(|| MailboxError::RecordNotFound(message.sender_public_key_ref.to_string()))?;
        Ok(EnvelopeCrypto::decrypt(&message.ciphertext, own, &sender.key)?)
    }

    /// Messages in the cache addressed to `recipient`, oldest first
    pub async fn inbox(&self, recipient: &RemoteId) -> Result<Vec<Message>, MailboxError> {
        Ok(self.cache.messages_for(recipient).await?)
    }
}
