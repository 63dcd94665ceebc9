//! Query engine: rows by plaintext tags
//!
//! A query is an AND over plaintext tags. The tags are translated to
//! random tags through the known tag pairs, the backend returns every row
//! whose random tags are a superset, and the rows are populated with the
//! same pairs.

use crate::{
    populate::populate_rows_after_get,
    tags::known_pairs,
    Result, ResultExt,
};
use cryptag_backend::{Backend, BackendError, Rows, TagPairs};
use tracing::{debug, info, instrument};

/// Random tags for `plaintags`, every one of which must have a pair
pub fn random_from_plain<S: AsRef<str>>(pairs: &TagPairs, plaintags: &[S]) -> Result<Vec<String>> {
    if plaintags.is_empty() {
        return Err(BackendError::EmptyQuery.into());
    }
    if pairs.is_empty() {
        return Err(BackendError::TagPairNotFound.into());
    }
    Ok(pairs.with_all_plain_tags(plaintags)?.all_random())
}

/// Rows carrying every tag in `plaintags`, payloads decrypted.
///
/// `pairs` is the caller's view of the backend's tag pairs; `None` fetches
/// them. A label with no pair is `TagPairNotFound`; no matching row is
/// `RowsNotFound`. Both report `is_not_found()`.
#[instrument(skip_all, fields(backend = bk.name(), tags = plaintags.len()))]
pub async fn rows_from_plain_tags<B, S>(
    bk: &B,
    pairs: Option<&TagPairs>,
    plaintags: &[S],
) -> Result<Rows>
where
    B: Backend + ?Sized,
    S: AsRef<str>,
{
    if plaintags.is_empty() {
        return Err(BackendError::EmptyQuery.into());
    }
    let pairs = known_pairs(bk, pairs).await?;
    let randtags = random_from_plain(&pairs, plaintags)?;

    let mut rows = bk
        .rows_from_random_tags(&randtags)
        .await
        .context("fetching rows")?;
    if rows.is_empty() {
        return Err(BackendError::RowsNotFound.into());
    }
    populate_rows_after_get(bk, &mut rows, &pairs)?;
    debug!(count = rows.len(), "fetched rows");
    Ok(rows)
}

/// Rows carrying every tag in `plaintags`, with plaintext tags resolved
/// but no payloads loaded
#[instrument(skip_all, fields(backend = bk.name(), tags = plaintags.len()))]
pub async fn list_rows_from_plain_tags<B, S>(
    bk: &B,
    pairs: Option<&TagPairs>,
    plaintags: &[S],
) -> Result<Rows>
where
    B: Backend + ?Sized,
    S: AsRef<str>,
{
    if plaintags.is_empty() {
        return Err(BackendError::EmptyQuery.into());
    }
    let pairs = known_pairs(bk, pairs).await?;
    let randtags = random_from_plain(&pairs, plaintags)?;

    let mut rows = bk.list_rows(&randtags).await.context("listing rows")?;
    if rows.is_empty() {
        return Err(BackendError::RowsNotFound.into());
    }
    rows.set_plain_tags(&pairs);
    debug!(count = rows.len(), "listed rows");
    Ok(rows)
}

/// Delete every row carrying all of `plaintags`
#[instrument(skip_all, fields(backend = bk.name(), tags = plaintags.len()))]
pub async fn delete_rows<B, S>(bk: &B, pairs: Option<&TagPairs>, plaintags: &[S]) -> Result<()>
where
    B: Backend + ?Sized,
    S: AsRef<str>,
{
    if plaintags.is_empty() {
        return Err(BackendError::EmptyQuery.into());
    }
    let pairs = known_pairs(bk, pairs).await?;
    let randtags = random_from_plain(&pairs, plaintags)?;

    bk.delete_rows(&randtags).await.context("deleting rows")?;
    info!("deleted rows");
    Ok(())
}
