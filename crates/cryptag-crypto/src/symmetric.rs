//! Authenticated symmetric encryption using XChaCha20-Poly1305
//!
//! Every tag label and row payload is sealed with the backend key and a
//! fresh 24-byte nonce. Decryption fails closed: a wrong key, a flipped
//! ciphertext bit or a flipped nonce bit all yield
//! [`CryptoError::Decryption`], never plaintext.

use crate::{
    CryptoError, Result,
    keys::{Key, NONCE_SIZE},
};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce, KeyInit,
    aead::Aead as AeadTrait,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// A nonce for XChaCha20-Poly1305. Serialized as an array of 24 integers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce {
    bytes: [u8; NONCE_SIZE],
}

impl Nonce {
    /// Generate a random nonce
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::RngCore::fill_bytes(&mut OsRng, &mut bytes);
        Self { bytes }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonce(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; NONCE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the nonce bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.bytes
    }

    /// An all-zero nonce marks a value that was never sealed.
    pub fn is_zero(&self) -> bool {
        self.bytes == [0u8; NONCE_SIZE]
    }
}

/// XChaCha20-Poly1305 bound to one key
pub struct SecretBox {
    cipher: XChaCha20Poly1305,
}

impl SecretBox {
    /// Create a cipher instance for `key`
    pub fn new(key: &Key) -> Result<Self> {
        let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt data with the given nonce
    pub fn seal(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce.as_bytes()), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Decrypt and authenticate data with the given nonce
    pub fn open(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() {
            return Err(CryptoError::DecryptEmpty);
        }
        self.cipher
            .decrypt(XNonce::from_slice(nonce.as_bytes()), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }
}

/// Encrypt `plaintext` under `key` with the caller-supplied nonce
pub fn encrypt(plaintext: &[u8], nonce: &Nonce, key: &Key) -> Result<Vec<u8>> {
    SecretBox::new(key)?.seal(nonce, plaintext)
}

/// Decrypt `ciphertext` sealed under `key` and `nonce`
pub fn decrypt(ciphertext: &[u8], nonce: &Nonce, key: &Key) -> Result<Vec<u8>> {
    SecretBox::new(key)?.open(nonce, ciphertext)
}

/// Encrypt with a freshly generated nonce (convenience function)
pub fn seal(plaintext: &[u8], key: &Key) -> Result<(Nonce, Vec<u8>)> {
    let nonce = Nonce::generate();
    let ciphertext = encrypt(plaintext, &nonce, key)?;
    Ok((nonce, ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_roundtrip() {
        let key = Key::generate();
        let (nonce, ciphertext) = seal(b"Hello, World!", &key).unwrap();
        let decrypted = decrypt(&ciphertext, &nonce, &key).unwrap();
        assert_eq!(decrypted, b"Hello, World!");
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let (nonce, ciphertext) = seal(b"secret", &Key::generate()).unwrap();
        let result = decrypt(&ciphertext, &nonce, &Key::generate());
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_flipped_ciphertext_bit_fails() {
        let key = Key::generate();
        let (nonce, mut ciphertext) = seal(b"secret", &key).unwrap();
        ciphertext[0] ^= 0x01;
        assert!(decrypt(&ciphertext, &nonce, &key).unwrap_err().is_authentication_failure());
    }

    #[test]
    fn test_flipped_nonce_bit_fails() {
        let key = Key::generate();
        let (nonce, ciphertext) = seal(b"secret", &key).unwrap();
        let mut bytes = *nonce.as_bytes();
        bytes[NONCE_SIZE - 1] ^= 0x80;
        let tampered = Nonce::from_bytes(&bytes).unwrap();
        assert!(decrypt(&ciphertext, &tampered, &key).unwrap_err().is_authentication_failure());
    }

    #[test]
    fn test_empty_ciphertext() {
        let key = Key::generate();
        let result = decrypt(&[], &Nonce::generate(), &key);
        assert!(matches!(result, Err(CryptoError::DecryptEmpty)));
    }

    #[test]
    fn test_empty_plaintext_still_authenticates() {
        let key = Key::generate();
        let (nonce, ciphertext) = seal(b"", &key).unwrap();
        assert!(!ciphertext.is_empty());
        assert!(decrypt(&ciphertext, &nonce, &key).unwrap().is_empty());
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = Key::generate();
        let (n1, c1) = seal(b"same", &key).unwrap();
        let (n2, c2) = seal(b"same", &key).unwrap();
        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_nonce_is_zero() {
        assert!(Nonce::default().is_zero());
        assert!(!Nonce::generate().is_zero());
        assert!(Nonce::from_bytes(&[0u8; 12]).is_err());
    }

    #[test]
    fn test_nonce_json_is_byte_array() {
        let nonce = Nonce::from_bytes(&[1u8; NONCE_SIZE]).unwrap();
        let json = serde_json::to_string(&nonce).unwrap();
        assert_eq!(json, format!("[{}]", vec!["1"; NONCE_SIZE].join(",")));
    }

    proptest! {
        #[test]
        fn prop_seal_open(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = Key::generate();
            let (nonce, ciphertext) = seal(&data, &key).unwrap();
            prop_assert_eq!(decrypt(&ciphertext, &nonce, &key).unwrap(), data);
        }
    }
}
