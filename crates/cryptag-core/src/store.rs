//! Tag store: one backend plus a shared tag-pair cache

use crate::{
    cache::TagPairCache,
    highlevel::{unique_row, version_tags},
    populate::populate_rows_after_get,
    query::{self, random_from_plain},
    CoreError, Result, ResultExt,
};
use cryptag_backend::{Backend, BackendError, BackendRegistry, Row, Rows, TagPairs};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Handle to one backend for creating, querying and deleting rows by
/// plaintext tags.
///
/// Tag pairs are cached after first use. Row creation resolves its tags
/// through the cache, so concurrent creations through the same store never
/// create two pairs for one label. Queries that name a label the cache does
/// not know refresh the cache once and retry, picking up tags created by
/// other clients.
#[derive(Debug)]
pub struct TagStore {
    backend: Arc<dyn Backend>,
    cache: TagPairCache,
    fan_out: usize,
}

impl TagStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let fan_out = backend.fan_out_limit();
        Self {
            backend,
            cache: TagPairCache::new(),
            fan_out,
        }
    }

    /// Open the backend named `name` (else the default one) through `registry`
    pub async fn load(registry: &BackendRegistry, name: Option<&str>) -> Result<Self> {
        let backend = registry.load(name).await.context("loading backend")?;
        Ok(Self::new(backend))
    }

    /// Cap the number of tag saves in flight during row creation
    pub fn with_fan_out(mut self, limit: usize) -> Self {
        self.fan_out = limit.max(1);
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn fan_out_limit(&self) -> usize {
        self.fan_out
    }

    /// Every known tag pair
    pub async fn tag_pairs(&self) -> Result<TagPairs> {
        self.cache.get(&*self.backend).await
    }

    /// Refetch every tag pair from the backend
    pub async fn refresh(&self) -> Result<TagPairs> {
        self.cache.refresh(&*self.backend).await
    }

    /// Create and save a row tagged exactly `plaintags`, replacing any row
    /// with the same tags
    #[instrument(skip_all, fields(backend = self.backend.name(), tags = plaintags.len()))]
    pub async fn create_row<S: AsRef<str>>(
        &self,
        data: impl Into<Vec<u8>>,
        plaintags: &[S],
    ) -> Result<Row> {
        self.save(Row::new(data, plaintags)?).await
    }

    /// Create and save a row with `id:`, `created:` and `all` tags added
    #[instrument(skip_all, fields(backend = self.backend.name(), tags = plaintags.len()))]
    pub async fn create_tracked_row<S: AsRef<str>>(
        &self,
        data: impl Into<Vec<u8>>,
        plaintags: &[S],
    ) -> Result<Row> {
        self.save(Row::new_tracked(data, plaintags)?).await
    }

    /// Save a new version of the single row tagged `prev_id_tag`
    #[instrument(skip_all, fields(backend = self.backend.name()))]
    pub async fn update_row(&self, prev_id_tag: &str, new_data: impl Into<Vec<u8>>) -> Result<Row> {
        let old = match unique_row(&*self.backend, &self.tag_pairs().await?, prev_id_tag).await {
            Err(e) if is_unknown_tag(&e) => {
                let pairs = self.refresh().await?;
                unique_row(&*self.backend, &pairs, prev_id_tag).await?
            }
            other => other?,
        };
        let tags = version_tags(&old, old.plain_tags());
        self.save(Row::new_tracked(new_data, &tags)?).await
    }

    /// Rows carrying every tag in `plaintags`, payloads decrypted
    #[instrument(skip_all, fields(backend = self.backend.name(), tags = plaintags.len()))]
    pub async fn rows<S: AsRef<str>>(&self, plaintags: &[S]) -> Result<Rows> {
        let pairs = self.tag_pairs().await?;
        match query::rows_from_plain_tags(&*self.backend, Some(&pairs), plaintags).await {
            Err(e) if is_unknown_tag(&e) => {
                let pairs = self.refresh().await?;
                query::rows_from_plain_tags(&*self.backend, Some(&pairs), plaintags).await
            }
            Ok(mut rows) if has_unresolved_tags(&rows) => {
                // rows carry tags created elsewhere since the cache loaded
                let pairs = self.refresh().await?;
                populate_rows_after_get(&*self.backend, &mut rows, &pairs)?;
                Ok(rows)
            }
            other => other,
        }
    }

    /// Rows carrying every tag in `plaintags`, payloads not loaded
    #[instrument(skip_all, fields(backend = self.backend.name(), tags = plaintags.len()))]
    pub async fn list_rows<S: AsRef<str>>(&self, plaintags: &[S]) -> Result<Rows> {
        let pairs = self.tag_pairs().await?;
        match query::list_rows_from_plain_tags(&*self.backend, Some(&pairs), plaintags).await {
            Err(e) if is_unknown_tag(&e) => {
                let pairs = self.refresh().await?;
                query::list_rows_from_plain_tags(&*self.backend, Some(&pairs), plaintags).await
            }
            Ok(mut rows) if has_unresolved_tags(&rows) => {
                let pairs = self.refresh().await?;
                rows.set_plain_tags(&pairs);
                Ok(rows)
            }
            other => other,
        }
    }

    /// Delete every row carrying all of `plaintags`
    #[instrument(skip_all, fields(backend = self.backend.name(), tags = plaintags.len()))]
    pub async fn delete_rows<S: AsRef<str>>(&self, plaintags: &[S]) -> Result<()> {
        let pairs = self.tag_pairs().await?;
        let randtags = match random_from_plain(&pairs, plaintags) {
            Err(e) if is_unknown_tag(&e) => random_from_plain(&self.refresh().await?, plaintags)?,
            other => other?,
        };
        self.backend
            .delete_rows(&randtags)
            .await
            .context("deleting rows")?;
        info!("deleted rows");
        Ok(())
    }

    async fn save(&self, mut row: Row) -> Result<Row> {
        let (pairs, creation) = self
            .cache
            .ensure(&*self.backend, row.plain_tags(), self.fan_out)
            .await
            .context("creating tag pairs")?;
        if !creation.is_complete() {
            warn!(
                failed = creation.failures.len(),
                "row will be saved without some of its tags"
            );
        }

        let missing = row.set_random_tags(&pairs);
        if !missing.is_empty() {
            debug!(missing = ?missing, "labels without a tag pair");
        }
        row.encrypt(self.backend.key()).context("encrypting row")?;
        self.backend.save_row(&row).await.context("saving row")?;
        debug!(bytes = row.decrypted().len(), "saved row");
        Ok(row)
    }
}

fn is_unknown_tag(err: &CoreError) -> bool {
    matches!(err.root(), CoreError::Backend(BackendError::TagPairNotFound))
}

fn has_unresolved_tags(rows: &Rows) -> bool {
    rows.iter()
        .any(|row| row.plain_tags().len() != row.random_tags.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlevel::create_row;
    use crate::rowutil::tag_with_prefix;
    use cryptag_backend::{row::ID_PREFIX, MemoryBackend};
    use cryptag_crypto::Key;

    fn store() -> (Arc<MemoryBackend>, TagStore) {
        let bk = Arc::new(MemoryBackend::new("mem", Key::generate()));
        let store = TagStore::new(bk.clone()).with_fan_out(4);
        (bk, store)
    }

    #[tokio::test]
    async fn test_create_and_query() {
        let (bk, store) = store();
        assert_eq!(store.fan_out_limit(), 4);

        store.create_row("one", &["x", "y"]).await.unwrap();
        store.create_row("two", &["x"]).await.unwrap();
        assert_eq!(bk.tag_pair_count(), 2);
        assert_eq!(store.tag_pairs().await.unwrap().len(), 2);

        let rows = store.rows(&["y"]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].decrypted(), b"one");
        assert_eq!(store.list_rows(&["x"]).await.unwrap().len(), 2);

        store.delete_rows(&["y"]).await.unwrap();
        assert_eq!(bk.row_count(), 1);
    }

    #[tokio::test]
    async fn test_sees_tags_created_elsewhere() {
        let (bk, store) = store();
        store.create_row("mine", &["shared"]).await.unwrap();

        // another client writes through the backend directly
        create_row(&*bk, None, "theirs", &["shared", "fresh"]).await.unwrap();

        let rows = store.rows(&["fresh"]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].decrypted(), b"theirs");

        let listed = store.list_rows(&["shared"]).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.has_plain_tag("shared")));
    }

    #[tokio::test]
    async fn test_spawned_creations_share_pairs() {
        let (bk, store) = store();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_tracked_row(format!("row {i}"), &["inbox", "todo"]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let pairs = store.refresh().await.unwrap();
        let plain = pairs.all_plain();
        for label in ["inbox", "todo", "all"] {
            assert_eq!(plain.iter().filter(|p| **p == label).count(), 1);
        }
        assert_eq!(bk.tag_pair_count(), pairs.len());
        assert_eq!(store.rows(&["inbox", "todo"]).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_same_tags_replace_row() {
        let (bk, store) = store();
        store.create_row("first", &["same", "labels"]).await.unwrap();
        store.create_row("second", &["same", "labels"]).await.unwrap();
        assert_eq!(bk.row_count(), 1);
        let rows = store.rows(&["same"]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].decrypted(), b"second");

        store.create_tracked_row("third", &["same", "labels"]).await.unwrap();
        store.create_tracked_row("fourth", &["same", "labels"]).await.unwrap();
        assert_eq!(store.rows(&["same"]).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_row() {
        let (_bk, store) = store();
        let first = store.create_tracked_row("v1", &["doc"]).await.unwrap();
        let id = tag_with_prefix(&first, &[ID_PREFIX]).unwrap().to_string();

        let second = store.update_row(&id, "v2").await.unwrap();
        assert!(second.has_plain_tag("doc"));
        assert!(second.has_plain_tag(&format!("origversionrow:{}", id)));
        assert!(!second.has_plain_tag(&id));
        assert_eq!(store.rows(&["doc"]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tag_after_refresh_is_not_found() {
        let (_bk, store) = store();
        store.create_row("a", &["a"]).await.unwrap();
        let err = store.rows(&["missing"]).await.unwrap_err();
        assert!(err.is_not_found());
        let err = store.delete_rows(&["missing"]).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
