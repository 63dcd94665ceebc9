//! Tag resolution and creation
//!
//! Before a row is saved, every plaintext tag it carries needs a tag pair.
//! Labels that already have one are reused; the rest get a fresh random
//! tag, are sealed under the backend key, and are saved concurrently with
//! at most [`Backend::fan_out_limit`] saves in flight.

use crate::{CoreError, Result, ResultExt};
use cryptag_backend::{fan_out, Backend, TagPair, TagPairs};
use std::borrow::Cow;
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

/// Outcome of creating the missing tag pairs for a set of labels
#[derive(Debug, Default)]
pub struct TagCreation {
    /// Pairs that were created and saved
    pub created: TagPairs,
    /// Labels whose pair could not be created, with the reason
    pub failures: Vec<(String, CoreError)>,
}

impl TagCreation {
    /// Whether every missing label got a pair
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Seal `plain` with a fresh random tag and save the pair
pub async fn create_tag<B>(bk: &B, plain: &str) -> Result<TagPair>
where
    B: Backend + ?Sized,
{
    let pair = TagPair::seal(plain, bk.key())?;
    bk.save_tag_pair(&pair).await.context("saving new tag pair")?;
    debug!(tag = plain, random = %pair.random, "created tag pair");
    Ok(pair)
}

/// Create a tag pair for every label in `plaintags` that `known` lacks.
///
/// Creation of separate labels is independent: one failure does not stop
/// the others. Failures are logged and returned in
/// [`TagCreation::failures`]; the call fails only if every creation failed.
pub async fn create_tags_from_plain<B, S>(
    bk: &B,
    known: &TagPairs,
    plaintags: &[S],
) -> Result<TagCreation>
where
    B: Backend + ?Sized,
    S: AsRef<str>,
{
    create_tags_with_limit(bk, known, plaintags, bk.fan_out_limit()).await
}

/// [`create_tags_from_plain`] with at most `limit` saves in flight
#[instrument(skip_all, fields(backend = bk.name(), requested = plaintags.len(), limit = limit))]
pub async fn create_tags_with_limit<B, S>(
    bk: &B,
    known: &TagPairs,
    plaintags: &[S],
    limit: usize,
) -> Result<TagCreation>
where
    B: Backend + ?Sized,
    S: AsRef<str>,
{
    let have: HashSet<&str> = known.all_plain().into_iter().collect();
    let mut seen = HashSet::new();
    let missing: Vec<String> = plaintags
        .iter()
        .map(AsRef::as_ref)
        .filter(|t| !have.contains(t) && seen.insert(*t))
        .map(str::to_string)
        .collect();

    let mut creation = TagCreation::default();
    if missing.is_empty() {
        return Ok(creation);
    }

    let results = fan_out(missing, limit, |plain: String| async move {
        let result = create_tag(bk, &plain).await;
        (plain, result)
    })
    .await;

    for (plain, result) in results {
        match result {
            Ok(pair) => creation.created.push(pair),
            Err(e) => {
                warn!(error = %e, "failed to create tag pair");
                debug!(tag = %plain, "tag pair creation failed");
                creation.failures.push((plain, e));
            }
        }
    }

    if creation.created.is_empty() {
        let failed = creation.failures.len();
        if let Some((_, first)) = std::mem::take(&mut creation.failures).into_iter().next() {
            return Err(CoreError::TagCreationFailed {
                failed,
                source: Box::new(first),
            });
        }
    }
    debug!(
        created = creation.created.len(),
        failed = creation.failures.len(),
        "created tag pairs"
    );
    Ok(creation)
}

/// `pairs` when given, else every pair the backend holds
pub async fn known_pairs<'a, B>(bk: &B, pairs: Option<&'a TagPairs>) -> Result<Cow<'a, TagPairs>>
where
    B: Backend + ?Sized,
{
    match pairs {
        Some(pairs) => Ok(Cow::Borrowed(pairs)),
        None => {
            let all = bk.all_tag_pairs().await.context("fetching tag pairs")?;
            debug!(count = all.len(), "fetched all tag pairs");
            Ok(Cow::Owned(all))
        }
    }
}
