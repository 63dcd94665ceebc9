//! Error types for the cryptag-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Authenticated decryption failed (wrong key, or tampered ciphertext or nonce)
    #[error("decryption failed: ciphertext could not be authenticated")]
    Decryption,

    /// There was nothing to decrypt
    #[error("decryption failed: empty ciphertext")]
    DecryptEmpty,

    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid nonce
    #[error("invalid nonce: {0}")]
    InvalidNonce(String),
}

impl CryptoError {
    /// True when the ciphertext failed authentication.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<CryptoError> {
        vec![
            CryptoError::Encryption("x".into()),
            CryptoError::Decryption,
            CryptoError::DecryptEmpty,
            CryptoError::InvalidKey("x".into()),
            CryptoError::InvalidNonce("x".into()),
        ]
    }

    #[test]
    fn test_only_decryption_is_authentication_failure() {
        for err in all_variants() {
            let expected = match &err {
                CryptoError::Decryption => true,
                CryptoError::Encryption(_)
                | CryptoError::DecryptEmpty
                | CryptoError::InvalidKey(_)
                | CryptoError::InvalidNonce(_) => false,
            };
            assert_eq!(err.is_authentication_failure(), expected, "{err}");
        }
    }
}
