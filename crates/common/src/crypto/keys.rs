use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};
use x25519_dalek::{PublicKey as X25519PublicKey, SharedSecret, StaticSecret};

/// Size of a Curve25519 private scalar in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of a Curve25519 public point in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
/// PEM tag used when a private key is written to disk
pub const PRIVATE_KEY_PEM_TAG: &str = "X25519 PRIVATE KEY";

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Public half of a device identity key
///
/// A raw X25519 (Montgomery) point. Peers publish this through the
/// remote directory; anyone holding it can run key agreement against
/// the matching [`PrivateKey`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl From<[u8; PUBLIC_KEY_SIZE]> for PublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        PublicKey(bytes)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid public key size, expected {}, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Ok(buff.into())
    }
}

impl PublicKey {
    /// Parse a public key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("public key hex decode error"))?;
        Ok(buff.into())
    }

    /// Convert public key to raw bytes
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    /// Get a reference to the raw public key bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Convert public key to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub(crate) fn to_x25519(self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }
}

/// Private half of a device identity key
///
/// A 32-byte Curve25519 scalar used for X25519 key agreement. Exactly one
/// of these exists per local account; it is generated once, persisted in a
/// [`SecretStore`](crate::secret_store::SecretStore) and never mutated.
///
/// The scalar is zeroized when the key is dropped, and `Debug` never prints
/// the key material.
///
/// # Examples
///
/// ```ignore
/// let private_key = PrivateKey::generate()?;
/// let public_key = private_key.public();
///
/// let pem = private_key.to_pem();
/// let recovered = PrivateKey::from_pem(&pem)?;
/// assert_eq!(recovered.public(), public_key);
/// ```
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey").field(&"<redacted>").finish()
    }
}

impl ConstantTimeEq for PrivateKey {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.as_bytes().ct_eq(other.0.as_bytes())
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for PrivateKey {}

impl From<[u8; PRIVATE_KEY_SIZE]> for PrivateKey {
    fn from(secret: [u8; PRIVATE_KEY_SIZE]) -> Self {
        Self(StaticSecret::from(secret))
    }
}

impl TryFrom<&[u8]> for PrivateKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid private key size, expected {}, got {}",
                PRIVATE_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PRIVATE_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Ok(Self::from(buff))
    }
}

impl PrivateKey {
    /// Generate a new random private key using the operating system RNG
    pub fn generate() -> Result<Self, KeyError> {
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| anyhow::anyhow!("failed to generate random bytes: {}", e))?;
        Ok(Self::from(bytes))
    }

    /// Parse a private key from a hexadecimal string
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PRIVATE_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("private key hex decode error"))?;
        Ok(Self::from(buff))
    }

    /// Derive the public key for this private key
    pub fn public(&self) -> PublicKey {
        PublicKey(X25519PublicKey::from(&self.0).to_bytes())
    }

    /// Convert private key to its raw 32-byte representation
    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Convert private key to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Encode private key in PEM format for storage on disk
    pub fn to_pem(&self) -> String {
        let pem = pem::Pem::new(PRIVATE_KEY_PEM_TAG, self.to_bytes());
        pem::encode(&pem)
    }

    /// Parse a private key from PEM format
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The PEM string is malformed
    /// - The PEM tag is not [`PRIVATE_KEY_PEM_TAG`]
    /// - The key size is incorrect
    pub fn from_pem(pem_str: &str) -> Result<Self, KeyError> {
        let pem = pem::parse(pem_str).map_err(|e| anyhow::anyhow!("failed to parse PEM: {}", e))?;

        if pem.tag() != PRIVATE_KEY_PEM_TAG {
            return Err(anyhow::anyhow!(
                "invalid PEM tag, expected {}, got {}",
                PRIVATE_KEY_PEM_TAG,
                pem.tag()
            )
            .into());
        }

        Self::try_from(pem.contents())
    }

    /// X25519 agreement against a peer's public key
    pub(crate) fn agree(&self, peer: &PublicKey) -> SharedSecret {
        self.0.diffie_hellman(&peer.to_x25519())
    }
}
