//! # CrypTag Backend
//!
//! Storage layer for the CrypTag encrypted tag store.
//!
//! This crate provides:
//! - **Data model**: tag pairs (random tag bound to an encrypted label) and
//!   rows (encrypted payload indexed by random tags)
//! - **Backend trait**: the capability contract every store implements
//! - **Row keys**: a row's random tags encoded as its storage name, so a
//!   directory listing is the index
//! - **Configuration**: per-backend JSON configs and the default backend
//! - **Registry**: backend type name to constructor
//! - **Backends**: local filesystem and in-memory
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Query engine (cryptag-core)       │
//! ├─────────────────────────────────────────┤
//! │             Backend Trait               │
//! ├────────────────────┬────────────────────┤
//! │     FileSystem     │   MemoryBackend    │
//! ├────────────────────┴────────────────────┤
//! │  <data>/tags/<random>  <data>/rows/<k>  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A backend only ever sees random tags, ciphertext and nonces.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cryptag_backend::{Backend, FileSystem, Config};
//!
//! let mut config = Config::filesystem("laptop", "/home/me/.cryptag");
//! config.canonicalize(&paths)?;
//! let fs = FileSystem::open(config).await?;
//! let pairs = fs.all_tag_pairs().await?;
//! ```

mod base64_serde;

pub mod config;
pub mod error;
pub mod fanout;
pub mod filesystem;
pub mod memory;
pub mod registry;
pub mod row;
pub mod row_key;
pub mod tag_pair;

pub use config::{Config, ConfigScan, Paths};
pub use error::{BackendError, Result};
pub use fanout::{fan_out, DEFAULT_FAN_OUT};
pub use filesystem::FileSystem;
pub use memory::MemoryBackend;
pub use registry::{BackendRegistry, Maker};
pub use row::{Row, Rows, StoredRow};
pub use row_key::{RowKey, TAG_DELIMITER};
pub use tag_pair::{StoredTagPair, TagPair, TagPairs};

use async_trait::async_trait;
use cryptag_crypto::Key;

/// Capability contract of a storage backend.
///
/// Every method that reads tag pairs returns them decrypted. Row reads
/// return payloads decrypted (`rows_from_random_tags`) or not loaded at
/// all (`list_rows`); resolving plaintext tags is left to the caller.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name (its config name)
    fn name(&self) -> &str;

    /// The key every tag and row of this backend is encrypted with
    fn key(&self) -> &Key;

    /// How many storage operations to run at once
    fn fan_out_limit(&self) -> usize {
        DEFAULT_FAN_OUT
    }

    /// Every stored tag pair, decrypted
    async fn all_tag_pairs(&self) -> Result<TagPairs>;

    /// The pairs stored under any of `randtags`, decrypted. Unknown tags
    /// are skipped; no match at all is `TagPairNotFound`.
    async fn tag_pairs_from_random_tags(&self, randtags: &[String]) -> Result<TagPairs>;

    /// Persist one pair under its random tag
    async fn save_tag_pair(&self, pair: &TagPair) -> Result<()>;

    /// Rows carrying every tag in `randtags`, without payloads
    async fn list_rows(&self, randtags: &[String]) -> Result<Rows>;

    /// Rows carrying every tag in `randtags`, payloads decrypted
    async fn rows_from_random_tags(&self, randtags: &[String]) -> Result<Rows>;

    /// Persist an encrypted row. A stored row with the same random tags is
    /// replaced.
    async fn save_row(&self, row: &Row) -> Result<()>;

    /// Remove every row carrying all of `randtags`
    async fn delete_rows(&self, randtags: &[String]) -> Result<()>;

    /// Config that reopens this backend
    fn to_config(&self) -> Result<Config>;
}

impl std::fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("name", &self.name()).finish_non_exhaustive()
    }
}

/// Rows whose keys carry every tag in `randtags`. Empty queries are rejected.
pub(crate) fn matching_keys<'a, I>(keys: I, randtags: &[String]) -> Result<Vec<RowKey>>
where
    I: IntoIterator<Item = &'a str>,
{
    if randtags.is_empty() {
        return Err(BackendError::EmptyQuery);
    }
    let matches: Vec<RowKey> = keys
        .into_iter()
        .filter_map(|name| match RowKey::parse(name) {
            Ok(key) => Some(key),
            Err(_) => {
                tracing::debug!(name, "skipping entry that is not a row key");
                None
            }
        })
        .filter(|key| key.contains_all(randtags))
        .collect();
    if matches.is_empty() {
        return Err(BackendError::RowsNotFound);
    }
    Ok(matches)
}
