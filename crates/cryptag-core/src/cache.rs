//! Shared cache of a backend's tag pairs
//!
//! Readers share the lock. A refresh takes it exclusively, and so does a
//! tag-creation batch for its whole duration: a refresh can never land
//! between a batch's saves and its append to the cache.

use crate::{
    tags::{create_tags_with_limit, TagCreation},
    Result, ResultExt,
};
use cryptag_backend::{Backend, TagPairs};
use tokio::sync::RwLock;
use tracing::debug;

/// Lazily loaded copy of every tag pair of one backend
#[derive(Debug, Default)]
pub struct TagPairCache {
    pairs: RwLock<Option<TagPairs>>,
}

impl TagPairCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached pairs, fetching them on first use
    pub async fn get<B>(&self, bk: &B) -> Result<TagPairs>
    where
        B: Backend + ?Sized,
    {
        if let Some(pairs) = self.pairs.read().await.as_ref() {
            return Ok(pairs.clone());
        }

        let mut guard = self.pairs.write().await;
        if let Some(pairs) = guard.as_ref() {
            return Ok(pairs.clone());
        }
        let pairs = fetch(bk).await?;
        *guard = Some(pairs.clone());
        Ok(pairs)
    }

    /// Refetch every pair from the backend
    pub async fn refresh<B>(&self, bk: &B) -> Result<TagPairs>
    where
        B: Backend + ?Sized,
    {
        let mut guard = self.pairs.write().await;
        let pairs = fetch(bk).await?;
        *guard = Some(pairs.clone());
        Ok(pairs)
    }

    /// Make sure every label in `plaintags` has a pair, creating the
    /// missing ones with at most `limit` saves in flight.
    ///
    /// Returns the cached pairs after the batch along with the batch
    /// outcome.
    pub async fn ensure<B, S>(
        &self,
        bk: &B,
        plaintags: &[S],
        limit: usize,
    ) -> Result<(TagPairs, TagCreation)>
    where
        B: Backend + ?Sized,
        S: AsRef<str>,
    {
        let mut guard = self.pairs.write().await;
        let cached = match guard.take() {
            Some(pairs) => pairs,
            None => fetch(bk).await?,
        };

        let creation = match create_tags_with_limit(bk, &cached, plaintags, limit).await {
            Ok(creation) => creation,
            Err(e) => {
                *guard = Some(cached);
                return Err(e);
            }
        };

        let mut pairs = cached;
        pairs.extend(creation.created.iter().cloned());
        *guard = Some(pairs.clone());
        Ok((pairs, creation))
    }

    /// Drop the cached pairs; the next read refetches
    pub async fn invalidate(&self) {
        *self.pairs.write().await = None;
    }

    /// Whether pairs are currently cached
    pub async fn is_loaded(&self) -> bool {
        self.pairs.read().await.is_some()
    }
}

async fn fetch<B>(bk: &B) -> Result<TagPairs>
where
    B: Backend + ?Sized,
{
    let pairs = bk.all_tag_pairs().await.context("fetching tag pairs")?;
    debug!(backend = bk.name(), count = pairs.len(), "loaded tag pair cache");
    Ok(pairs)
}
