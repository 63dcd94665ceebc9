//! # CrypTag Core
//!
//! Query engine for the CrypTag encrypted tag store.
//!
//! This crate provides:
//! - **Tag creation**: plaintext labels to random tags, creating missing
//!   pairs concurrently with a bounded fan-out
//! - **Row population**: encrypt and tag rows before save, decrypt and
//!   resolve their labels after fetch
//! - **Queries**: AND queries over plaintext tags, listing and deletion
//! - **High-level operations**: JSON and file rows, versioned updates
//! - **Row utilities**: prefix lookups, sorting, version grouping
//! - **TagStore**: a backend plus a shared tag-pair cache
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        TagStore  /  high-level ops      │
//! ├─────────────────────────────────────────┤
//! │   Query engine   │   Row population     │
//! ├─────────────────────────────────────────┤
//! │  Tag creation (bounded fan-out, cache)  │
//! ├─────────────────────────────────────────┤
//! │        Backend (cryptag-backend)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use cryptag_core::TagStore;
//!
//! let store = TagStore::new(backend);
//! store.create_row("hunter2", &["type:password", "site:example.com"]).await?;
//! let rows = store.rows(&["type:password"]).await?;
//! ```

pub mod cache;
pub mod error;
pub mod highlevel;
pub mod populate;
pub mod query;
pub mod rowutil;
pub mod store;
pub mod tags;

pub use cache::TagPairCache;
pub use error::{CoreError, Result, ResultExt};
pub use highlevel::{
    create_file_row, create_json_row, create_row, create_tracked_row, update_file_row, update_key,
    update_row, update_row_advanced,
};
pub use populate::{populate_row_after_get, populate_row_before_save, populate_rows_after_get};
pub use query::{delete_rows, list_rows_from_plain_tags, random_from_plain, rows_from_plain_tags};
pub use store::TagStore;
pub use tags::{create_tag, create_tags_from_plain, create_tags_with_limit, TagCreation};
