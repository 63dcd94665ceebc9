//! Error types for the cryptag-backend crate

use cryptag_crypto::CryptoError;
use thiserror::Error;

/// Result type alias using `BackendError`
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum BackendError {
    /// A tag pair or row failed validation before persisting
    #[error("validation failed: {0}")]
    Validation(String),

    /// A lookup was made with no tags
    #[error("must query by 1 or more tags")]
    EmptyQuery,

    /// No row carries every requested tag
    #[error("no rows found")]
    RowsNotFound,

    /// No tag pair matched
    #[error("tag pair not found")]
    TagPairNotFound,

    /// A stored row name could not be decoded into tags
    #[error("invalid row key `{0}`")]
    InvalidRowKey(String),

    /// Crypto error
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A config of that name is already saved
    #[error("config `{0}` already exists; not overwriting")]
    ConfigExists(String),

    /// No maker is registered for the backend type
    #[error("no backend maker registered for type `{0}`")]
    MakerNotFound(String),

    /// The config describes a different kind of backend
    #[error("wrong backend type: expected `{expected}`, got `{actual}`")]
    WrongBackendType { expected: String, actual: String },

    /// Operation unavailable on this platform or backend
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl BackendError {
    /// True for the "nothing matched" conditions callers may treat as empty results.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RowsNotFound | Self::TagPairNotFound)
    }

    /// True when stored ciphertext failed authentication (wrong key or tampering).
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Crypto(e) if e.is_authentication_failure())
    }

    /// True when the underlying error is a missing file.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

impl From<glob::PatternError> for BackendError {
    fn from(err: glob::PatternError) -> Self {
        BackendError::Config(format!("invalid config pattern: {}", err))
    }
}
