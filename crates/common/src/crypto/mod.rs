//! Cryptographic primitives for Courier
//!
//! - **Identity keys**: one X25519 keypair per device account
//!   (`PrivateKey`/`PublicKey`), generated once and published through the
//!   remote directory.
//! - **Envelopes**: per-pair symmetric keys derived with X25519 + HKDF-SHA512,
//!   used with ChaCha20-Poly1305 to seal message bodies.
//!
//! # Key Agreement Direction
//!
//! The sender uses `(own private, recipient public)`; the recipient uses
//! `(own private, sender public)`. Both compute the same shared secret.

mod envelope;
mod keys;

pub use envelope::{
    EnvelopeCrypto, EnvelopeError, SymmetricKey, MIN_ENVELOPE_SIZE, NONCE_SIZE, PROTOCOL_INFO,
    PROTOCOL_SALT, SYMMETRIC_KEY_SIZE, TAG_SIZE,
};
pub use keys::{
    KeyError, PrivateKey, PublicKey, PRIVATE_KEY_PEM_TAG, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE,
};
