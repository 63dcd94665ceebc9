//! Error types for the cryptag-core crate

use cryptag_backend::BackendError;
use cryptag_crypto::CryptoError;
use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in tag resolution, population and queries
#[derive(Error, Debug)]
pub enum CoreError {
    /// Backend error
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Crypto error
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// An operation failed; `context` says which
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<CoreError>,
    },

    /// Every requested tag pair creation failed; `source` is the first failure
    #[error("failed to create all {failed} tag pairs: {source}")]
    TagCreationFailed {
        failed: usize,
        #[source]
        source: Box<CoreError>,
    },

    /// A lookup expected to identify one row matched several
    #[error("expected 1 row tagged `{tag}`, got {count}")]
    RowNotUnique { tag: String, count: usize },

    /// Path does not name a regular file
    #[error("not a file: {0}")]
    NotAFile(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// True for "nothing matched" conditions, through any context wrapping
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_not_found(),
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True when stored ciphertext failed authentication, through any context wrapping
    pub fn is_authentication_failure(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_authentication_failure(),
            Self::Crypto(e) => e.is_authentication_failure(),
            Self::Context { source, .. } => source.is_authentication_failure(),
            _ => false,
        }
    }

    /// The innermost error below any context wrapping
    pub fn root(&self) -> &CoreError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Attach operation context to an error
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<CoreError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| CoreError::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| CoreError::Context {
            context: f(),
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_classification() {
        let err: Result<()> = Err(BackendError::RowsNotFound).context("fetching rows");
        let err = err.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "fetching rows: backend error: no rows found");

        let err: Result<()> = Err(CryptoError::Decryption).context("a").context("b");
        let err = err.unwrap_err();
        assert!(err.is_authentication_failure());
        assert!(!err.is_not_found());
        assert!(matches!(err.root(), CoreError::Crypto(_)));
    }
}
