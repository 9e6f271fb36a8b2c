//! Records cached locally and exchanged with the remote directory
//!
//! Records never hold each other directly. Relationships are stable ids
//! (`RemoteId` for identities, `Uuid` for key records and messages)
//! resolved through the [`LocalCache`](crate::cache::LocalCache).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::PublicKey;

/// Opaque record id assigned by the remote directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Parts of a person's name as reported by the directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameComponents {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

/// The signed-in user as resolved by the remote directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    pub record_id: RemoteId,
    pub name_components: Option<NameComponents>,
}

impl RemoteIdentity {
    pub fn new(record_id: impl Into<RemoteId>) -> Self {
        Self {
            record_id: record_id.into(),
            name_components: None,
        }
    }

    pub fn with_name(mut self, given_name: Option<&str>, family_name: Option<&str>) -> Self {
        self.name_components = Some(NameComponents {
            given_name: given_name.map(str::to_string),
            family_name: family_name.map(str::to_string),
        });
        self
    }

    /// Name to publish for this identity
    ///
    /// "given family", or whichever part is known. With no name parts at
    /// all a random UUID string is used so the record is still listable.
    pub fn display_name(&self) -> String {
        let components = self.name_components.clone().unwrap_or_default();
        match (components.given_name, components.family_name) {
            (Some(given), Some(family)) => format!("{} {}", given, family),
            (Some(given), None) => given,
            (None, Some(family)) => family,
            (None, None) => Uuid::new_v4().to_string(),
        }
    }
}

impl From<String> for RemoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A user's durable directory record
///
/// Immutable once persisted except for `display_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: RemoteId,
    pub display_name: String,
    pub public_key: PublicKey,
    pub created_at: DateTime<Utc>,
}

/// A published public key, linked to its owning identity by id
///
/// Key bytes never change after creation; rotation creates a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub id: Uuid,
    pub key: PublicKey,
    pub owner_identity_id: RemoteId,
}

/// The device's private identity key as synced through the owner's
/// private scope
///
/// At most one exists per owner.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKeyRecord {
    pub owner_id: RemoteId,
    pub key_bytes: [u8; 32],
}

impl fmt::Debug for PrivateKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyRecord")
            .field("owner_id", &self.owner_id)
            .field("key_bytes", &"<redacted>")
            .finish()
    }
}

/// An append-only encrypted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_public_key_ref: Uuid,
    pub recipient_identity_ref: RemoteId,
    pub ciphertext: Vec<u8>,
    pub sent_at: DateTime<Utc>,
}
