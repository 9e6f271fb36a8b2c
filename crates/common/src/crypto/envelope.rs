//! Message envelope encryption using X25519 + HKDF-SHA512 + ChaCha20-Poly1305
//!
//! Both parties of a conversation derive the same symmetric key from their
//! own private key and the other side's public key:
//!
//! 1. **Agree**: X25519 between `own_private` and `peer_public`
//! 2. **Derive**: HKDF-SHA512 over `(salt, shared_secret, info)` into 32 bytes
//! 3. **Seal**: ChaCha20-Poly1305 with a fresh random nonce
//!
//! # Wire Format
//!
//! ```text
//! [ nonce: 12 bytes ][ ciphertext: len(plaintext) bytes ][ tag: 16 bytes ]
//! ```
//!
//! Every failure on the open path surfaces as the single
//! [`EnvelopeError::CryptoFailure`] so callers cannot tell a wrong key from
//! a tampered or truncated envelope.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keys::{PrivateKey, PublicKey};

/// Size of the ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;
/// Size of the derived symmetric key in bytes
pub const SYMMETRIC_KEY_SIZE: usize = 32;
/// Smallest valid envelope: nonce and tag around an empty plaintext
pub const MIN_ENVELOPE_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// HKDF salt shared by every peer
pub const PROTOCOL_SALT: &[u8] = b"Iloveellie<3";
/// HKDF info shared by every peer
pub const PROTOCOL_INFO: &[u8] = b"";

/// The only error the envelope layer reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("cryptographic operation failed")]
    CryptoFailure,
}

/// A 256-bit symmetric key derived for one (private, public) pair
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SymmetricKey").field(&"<redacted>").finish()
    }
}

impl SymmetricKey {
    /// Get a reference to the key bytes
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Stateless envelope encryption
///
/// Holds no state and takes no locks; every call may run on any thread.
pub struct EnvelopeCrypto;

impl EnvelopeCrypto {
    /// Derive the symmetric key for a pair of identity keys
    ///
    /// Runs X25519 between `own_private` and `peer_public`, then HKDF-SHA512
    /// over `(salt, shared_secret, info)` with a 32 byte output. Agreement is
    /// commutative, so `derive(a, B) == derive(b, A)`.
    ///
    /// # Errors
    ///
    /// Fails with [`EnvelopeError::CryptoFailure`] if the peer key is a
    /// low-order point (the shared secret would be all zeroes).
    pub fn derive_symmetric_key(
        own_private: &PrivateKey,
        peer_public: &PublicKey,
        salt: &[u8],
        info: &[u8],
    ) -> Result<SymmetricKey, EnvelopeError> {
        let shared_secret = own_private.agree(peer_public);
        if !shared_secret.was_contributory() {
            return Err(EnvelopeError::CryptoFailure);
        }

        let hkdf = Hkdf::<Sha512>::new(Some(salt), shared_secret.as_bytes());
        let mut okm = [0u8; SYMMETRIC_KEY_SIZE];
        hkdf.expand(info, &mut okm)
            .map_err(|_| EnvelopeError::CryptoFailure)?;

        let key = SymmetricKey(okm);
        okm.zeroize();
        Ok(key)
    }

    /// Encrypt `plaintext` from `own_private` to `peer_public`
    ///
    /// Returns `nonce || ciphertext || tag`. A fresh random nonce is drawn
    /// for every call, so encrypting the same plaintext twice yields
    /// different envelopes.
    pub fn encrypt(
        plaintext: &[u8],
        own_private: &PrivateKey,
        peer_public: &PublicKey,
    ) -> Result<Vec<u8>, EnvelopeError> {
        let key =
            Self::derive_symmetric_key(own_private, peer_public, PROTOCOL_SALT, PROTOCOL_INFO)?;
        Self::seal(plaintext, &key)
    }

    /// Decrypt an envelope produced by [`EnvelopeCrypto::encrypt`]
    ///
    /// The recipient passes its own private key and the sender's public key.
    ///
    /// # Errors
    ///
    /// Fails with [`EnvelopeError::CryptoFailure`] when the envelope is too
    /// short, the key is wrong, or any byte was modified.
    pub fn decrypt(
        combined: &[u8],
        own_private: &PrivateKey,
        peer_public: &PublicKey,
    ) -> Result<Vec<u8>, EnvelopeError> {
        let key =
            Self::derive_symmetric_key(own_private, peer_public, PROTOCOL_SALT, PROTOCOL_INFO)?;
        Self::open(combined, &key)
    }

    /// Seal `plaintext` under an already-derived key
    pub fn seal(plaintext: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, EnvelopeError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.bytes()));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes).map_err(|_| EnvelopeError::CryptoFailure)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| EnvelopeError::CryptoFailure)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce.as_ref());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a `nonce || ciphertext || tag` envelope under an already-derived key
    pub fn open(combined: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, EnvelopeError> {
        if combined.len() < MIN_ENVELOPE_SIZE {
            return Err(EnvelopeError::CryptoFailure);
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.bytes()));
        let nonce = Nonce::from_slice(&combined[..NONCE_SIZE]);
        cipher
            .decrypt(nonce, &combined[NONCE_SIZE..])
            .map_err(|_| EnvelopeError::CryptoFailure)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn keypair() -> (PrivateKey, PublicKey) {
        let private_key = PrivateKey::generate().unwrap();
        let public_key = private_key.public();
        (private_key, public_key)
    }

    #[test]
    fn test_alice_sends_hi_to_bob() {
        let (alice, alice_pub) = keypair();
        let (bob, bob_pub) = keypair();

        let envelope = EnvelopeCrypto::encrypt(b"hi", &alice, &bob_pub).unwrap();
        let opened = EnvelopeCrypto::decrypt(&envelope, &bob, &alice_pub).unwrap();
        assert_eq!(opened, b"hi");
    }

    #[test]
    fn test_round_trip_various_lengths() {
        let (alice, alice_pub) = keypair();
        let (bob, bob_pub) = keypair();

        for len in [0usize, 1, 15, 16, 17, 64, 1000, 4096] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let envelope = EnvelopeCrypto::encrypt(&plaintext, &alice, &bob_pub).unwrap();
            assert_eq!(envelope.len(), NONCE_SIZE + len + TAG_SIZE);
            let opened = EnvelopeCrypto::decrypt(&envelope, &bob, &alice_pub).unwrap();
            assert_eq!(opened, plaintext);
        }
    }

    #[test]
    fn test_derivation_is_symmetric() {
        let (alice, alice_pub) = keypair();
        let (bob, bob_pub) = keypair();

        let a = EnvelopeCrypto::derive_symmetric_key(&alice, &bob_pub, PROTOCOL_SALT, PROTOCOL_INFO)
            .unwrap();
        let b = EnvelopeCrypto::derive_symmetric_key(&bob, &alice_pub, PROTOCOL_SALT, PROTOCOL_INFO)
            .unwrap();
        assert_eq!(a, b);

        let other_info =
            EnvelopeCrypto::derive_symmetric_key(&alice, &bob_pub, PROTOCOL_SALT, b"other").unwrap();
        assert_ne!(a, other_info);
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let (alice, _) = keypair();
        let (_, bob_pub) = keypair();

        let first = EnvelopeCrypto::encrypt(b"same", &alice, &bob_pub).unwrap();
        let second = EnvelopeCrypto::encrypt(b"same", &alice, &bob_pub).unwrap();
        assert_ne!(first, second);
        assert_ne!(first[..NONCE_SIZE], second[..NONCE_SIZE]);
    }

    #[test]
    fn test_any_flipped_byte_fails() {
        let (alice, alice_pub) = keypair();
        let (bob, bob_pub) = keypair();
        let envelope = EnvelopeCrypto::encrypt(b"attack at dawn", &alice, &bob_pub).unwrap();

        for i in 0..envelope.len() {
            let mut tampered = envelope.clone();
            tampered[i] ^= 0x01;
            let result = EnvelopeCrypto::decrypt(&tampered, &bob, &alice_pub);
            assert_eq!(result, Err(EnvelopeError::CryptoFailure), "byte {}", i);
        }
    }

    #[test]
    fn test_wrong_key_and_tamper_are_indistinguishable() {
        let (alice, alice_pub) = keypair();
        let (bob, bob_pub) = keypair();
        let (mallory, _) = keypair();
        let envelope = EnvelopeCrypto::encrypt(b"secret", &alice, &bob_pub).unwrap();

        let wrong_key = EnvelopeCrypto::decrypt(&envelope, &mallory, &alice_pub).unwrap_err();

        let mut tampered = envelope.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x80;
        let tampered_err = EnvelopeCrypto::decrypt(&tampered, &bob, &alice_pub).unwrap_err();

        let truncated = EnvelopeCrypto::decrypt(&envelope[..MIN_ENVELOPE_SIZE - 1], &bob, &alice_pub)
            .unwrap_err();

        assert_eq!(wrong_key, tampered_err);
        assert_eq!(tampered_err, truncated);
        assert_eq!(wrong_key.to_string(), tampered_err.to_string());
    }

    #[test]
    fn test_low_order_peer_key_rejected() {
        let (alice, _) = keypair();
        let identity_point = PublicKey::from([0u8; 32]);
        let result = EnvelopeCrypto::encrypt(b"hi", &alice, &identity_point);
        assert_eq!(result, Err(EnvelopeError::CryptoFailure));
    }
}
