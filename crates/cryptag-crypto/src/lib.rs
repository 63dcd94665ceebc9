//! # CrypTag Crypto
//!
//! Cryptographic primitives for the CrypTag encrypted tag store.
//!
//! This crate provides:
//! - **Authenticated encryption**: XChaCha20-Poly1305 with 24-byte nonces
//! - **Keys**: 32-byte symmetric keys with a human-readable text form
//! - **Random tags**: opaque tokens that stand in for plaintext labels
//!
//! ## Security Model
//!
//! - All encryption happens client-side
//! - The key never leaves the client device
//! - Storage backends only see ciphertext and random tokens
//!
//! ## Example
//!
//! ```rust
//! use cryptag_crypto::{Key, seal, decrypt};
//!
//! let key = Key::generate();
//! let (nonce, ciphertext) = seal(b"Hello, World!", &key).unwrap();
//! let plaintext = decrypt(&ciphertext, &nonce, &key).unwrap();
//! assert_eq!(plaintext, b"Hello, World!");
//! ```

pub mod error;
pub mod keys;
pub mod random;
pub mod symmetric;

pub use error::{CryptoError, Result};
pub use keys::{Key, KEY_SIZE, NONCE_SIZE};
pub use random::{random_string, random_tag, RANDOM_TAG_ALPHABET, RANDOM_TAG_LENGTH};
pub use symmetric::{decrypt, encrypt, seal, Nonce, SecretBox};
