//! Symmetric key material
//!
//! A single 32-byte key encrypts every tag label and every row payload of
//! a backend. The key never leaves the client; the storage provider only
//! ever sees ciphertext produced with it.

use crate::{CryptoError, Result};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a symmetric key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of a nonce in bytes (192 bits for XChaCha20-Poly1305)
pub const NONCE_SIZE: usize = 24;

/// A 256-bit symmetric key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    bytes: [u8; KEY_SIZE],
}

impl Key {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::RngCore::fill_bytes(&mut OsRng, &mut bytes);
        Self { bytes }
    }

    /// Create a key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Render the key as comma-separated decimal bytes (`12,0,255,...`).
    ///
    /// This is the form users copy between devices and the form
    /// [`Key::parse`] accepts.
    pub fn format(&self) -> String {
        self.bytes
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a key from its human-readable form.
    ///
    /// Every run of decimal digits is one byte; anything else (commas,
    /// spaces, brackets) separates bytes.
    pub fn parse(s: &str) -> Result<Self> {
        let mut bytes = Vec::with_capacity(KEY_SIZE);
        for part in s.split(|c: char| !c.is_ascii_digit()).filter(|p| !p.is_empty()) {
            let byte: u8 = part.parse().map_err(|_| {
                CryptoError::InvalidKey(format!("`{}` is not a byte value", part))
            })?;
            bytes.push(byte);
        }
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

// Serialized as a JSON array of 32 integers, the layout existing
// backend configs already use.
impl Serialize for Key {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.bytes.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let bytes = <[u8; KEY_SIZE]>::deserialize(d)?;
        Ok(Self { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let k1 = Key::generate();
        let k2 = Key::generate();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(Key::from_bytes(&[0u8; 31]).is_err());
        assert!(Key::from_bytes(&[0u8; 33]).is_err());
        assert!(Key::from_bytes(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_format_zero_key() {
        let key = Key::from_bytes(&[0u8; KEY_SIZE]).unwrap();
        assert_eq!(key.format(), vec!["0"; KEY_SIZE].join(","));
    }

    #[test]
    fn test_format_parse_roundtrip() {
        let key = Key::generate();
        let parsed = Key::parse(&key.format()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn test_parse_accepts_brackets_and_spaces() {
        let pattern: Vec<u8> = (0..8).cycle().take(KEY_SIZE).collect();
        let text = format!(
            "[{}]",
            pattern.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(", ")
        );
        let key = Key::parse(&text).unwrap();
        assert_eq!(key.as_bytes().as_slice(), pattern.as_slice());
    }

    #[test]
    fn test_parse_rejects_out_of_range_byte() {
        let text = format!("256{}", ",0".repeat(KEY_SIZE - 1));
        assert!(matches!(Key::parse(&text), Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_debug_redacts() {
        let key = Key::generate();
        assert_eq!(format!("{:?}", key), "Key(<redacted>)");
    }

    #[test]
    fn test_json_is_byte_array() {
        let key = Key::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert!(json.starts_with("[7,7,"));
        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }
}
