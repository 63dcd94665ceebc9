//! In-memory backend for testing and ephemeral stores
//!
//! Stores exactly what the filesystem backend would write to disk, keyed
//! the same way, so the raw stored JSON can be inspected.

use crate::{
    config::{Config, TYPE_MEMORY},
    matching_keys,
    row::{Row, Rows, StoredRow},
    row_key::{validate_random_tag, RowKey},
    tag_pair::{StoredTagPair, TagPair, TagPairs},
    Backend, BackendError, Result,
};
use async_trait::async_trait;
use cryptag_crypto::Key;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// An in-memory backend
#[derive(Clone)]
pub struct MemoryBackend {
    name: String,
    key: Key,
    tags: Arc<DashMap<String, StoredTagPair>>,
    rows: Arc<DashMap<String, StoredRow>>,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("name", &self.name)
            .field("tag_pairs", &self.tags.len())
            .field("rows", &self.rows.len())
            .finish_non_exhaustive()
    }
}

impl MemoryBackend {
    /// Create a new empty backend
    pub fn new(name: impl Into<String>, key: Key) -> Self {
        Self {
            name: name.into(),
            key,
            tags: Arc::new(DashMap::new()),
            rows: Arc::new(DashMap::new()),
        }
    }

    /// Create a new empty backend from a config, generating a key if none is set
    pub fn from_config(config: Config) -> Result<Self> {
        let backend_type = config.get_type();
        if backend_type != TYPE_MEMORY {
            return Err(BackendError::WrongBackendType {
                expected: TYPE_MEMORY.to_string(),
                actual: backend_type.to_string(),
            });
        }
        Ok(Self::new(config.name, config.key.unwrap_or_else(Key::generate)))
    }

    /// Number of stored tag pairs
    pub fn tag_pair_count(&self) -> usize {
        self.tags.len()
    }

    /// Number of stored rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Clear all tag pairs and rows
    pub fn clear(&self) {
        self.tags.clear();
        self.rows.clear();
    }

    /// Every stored tag pair as `(random tag, JSON)`, exactly as persisted
    pub fn raw_tag_pairs(&self) -> Result<Vec<(String, String)>> {
        self.tags
            .iter()
            .map(|e| Ok((e.key().clone(), serde_json::to_string(e.value())?)))
            .collect()
    }

    /// Every stored row as `(row key, JSON)`, exactly as persisted
    pub fn raw_rows(&self) -> Result<Vec<(String, String)>> {
        self.rows
            .iter()
            .map(|e| Ok((e.key().clone(), serde_json::to_string(e.value())?)))
            .collect()
    }

    /// Mutable access to a stored row, for corrupting it in tests
    pub fn with_stored_row<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut StoredRow),
    {
        match self.rows.get_mut(key) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    fn read_tag_pair(&self, random: &str) -> Option<Result<TagPair>> {
        let stored = self.tags.get(random)?.value().clone();
        let mut pair = TagPair::from_stored(random, stored);
        Some(pair.decrypt(&self.key).map(|_| pair))
    }

    fn matching_row_keys(&self, randtags: &[String]) -> Result<Vec<RowKey>> {
        let names: Vec<String> = self.rows.iter().map(|e| e.key().clone()).collect();
        matching_keys(names.iter().map(String::as_str), randtags)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn key(&self) -> &Key {
        &self.key
    }

    async fn all_tag_pairs(&self) -> Result<TagPairs> {
        let names: Vec<String> = self.tags.iter().map(|e| e.key().clone()).collect();
        names
            .iter()
            .filter_map(|name| self.read_tag_pair(name))
            .collect()
    }

    async fn tag_pairs_from_random_tags(&self, randtags: &[String]) -> Result<TagPairs> {
        if randtags.is_empty() {
            return Err(BackendError::EmptyQuery);
        }
        let mut pairs = TagPairs::new();
        for random in randtags {
            if pairs.find_random(random).is_some() {
                continue;
            }
            if let Some(pair) = self.read_tag_pair(random) {
                pairs.push(pair?);
            }
        }
        if pairs.is_empty() {
            return Err(BackendError::TagPairNotFound);
        }
        Ok(pairs)
    }

    async fn save_tag_pair(&self, pair: &TagPair) -> Result<()> {
        pair.validate()?;
        validate_random_tag(&pair.random)?;
        self.tags.insert(pair.random.clone(), pair.to_stored());
        Ok(())
    }

    async fn list_rows(&self, randtags: &[String]) -> Result<Rows> {
        let keys = self.matching_row_keys(randtags)?;
        Ok(keys.iter().map(Row::listed).collect())
    }

    async fn rows_from_random_tags(&self, randtags: &[String]) -> Result<Rows> {
        let keys = self.matching_row_keys(randtags)?;
        let mut rows = Rows::new();
        for key in &keys {
            // Deleted between listing and reading
            let Some(stored) = self.rows.get(key.as_str()).map(|e| e.value().clone()) else {
                continue;
            };
            let mut row = Row::from_stored(key, stored);
            row.decrypt_data(&self.key)?;
            rows.push(row);
        }
        if rows.is_empty() {
            return Err(BackendError::RowsNotFound);
        }
        Ok(rows)
    }

    async fn save_row(&self, row: &Row) -> Result<()> {
        row.validate_for_save()?;
        let key = row.row_key()?;
        self.rows.insert(key.as_str().to_string(), row.to_stored());
        Ok(())
    }

    async fn delete_rows(&self, randtags: &[String]) -> Result<()> {
        for key in self.matching_row_keys(randtags)? {
            self.rows.remove(key.as_str());
        }
        Ok(())
    }

    fn to_config(&self) -> Result<Config> {
        let mut config = Config::memory(self.name.clone());
        config.new = false;
        config.key = Some(self.key.clone());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tag_pairs() {
        let mem = MemoryBackend::new("mem", Key::generate());
        let pair = TagPair::seal("label", mem.key()).unwrap();
        mem.save_tag_pair(&pair).await.unwrap();

        assert_eq!(mem.tag_pair_count(), 1);
        let all = mem.all_tag_pairs().await.unwrap();
        assert_eq!(all.all_plain(), vec!["label"]);

        let found = mem
            .tag_pairs_from_random_tags(&[pair.random.clone(), pair.random.clone()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_rows_and_raw_view() {
        let mem = MemoryBackend::new("mem", Key::generate());
        let pair = TagPair::seal("label", mem.key()).unwrap();
        let mut row = Row::new("payload-bytes", &["label"]).unwrap();
        row.set_random_tags(&TagPairs::from(vec![pair.clone()]));
        row.encrypt(mem.key()).unwrap();
        mem.save_row(&row).await.unwrap();

        let rows = mem.rows_from_random_tags(&[pair.random.clone()]).await.unwrap();
        assert_eq!(rows[0].decrypted(), b"payload-bytes");

        let raw = mem.raw_rows().unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].0, pair.random);
        assert!(!raw[0].1.contains("payload-bytes"));

        mem.delete_rows(&[pair.random.clone()]).await.unwrap();
        assert_eq!(mem.row_count(), 0);
    }

    #[tokio::test]
    async fn test_tampered_row_fails_closed() {
        let mem = MemoryBackend::new("mem", Key::generate());
        let pair = TagPair::seal("t", mem.key()).unwrap();
        let mut row = Row::new("data", &["t"]).unwrap();
        row.set_random_tags(&TagPairs::from(vec![pair.clone()]));
        row.encrypt(mem.key()).unwrap();
        mem.save_row(&row).await.unwrap();

        assert!(mem.with_stored_row(&pair.random, |stored| stored.data[0] ^= 1));
        let err = mem.rows_from_random_tags(&[pair.random.clone()]).await.unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_from_config() {
        let mem = MemoryBackend::from_config(Config::memory("ephemeral")).unwrap();
        assert_eq!(mem.name(), "ephemeral");
        assert_eq!(mem.to_config().unwrap().get_type(), TYPE_MEMORY);

        let err = MemoryBackend::from_config(Config::filesystem("fs", "/tmp")).unwrap_err();
        assert!(matches!(err, BackendError::WrongBackendType { .. }));
    }
}
