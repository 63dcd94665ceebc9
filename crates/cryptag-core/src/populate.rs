//! Row population
//!
//! Before save, a row's plaintext tags become random tags (creating pairs
//! as needed) and its payload is encrypted. After fetch, its payload is
//! decrypted and its random tags are translated back to plaintext.

use crate::{tags::create_tags_from_plain, Result, ResultExt};
use cryptag_backend::{Backend, Row, Rows, TagPairs};
use tracing::{instrument, warn};

/// Assign random tags to `row` and encrypt it, creating any missing tag
/// pairs. Returns the newly created pairs so callers can extend their
/// view of the backend's tags.
///
/// Labels whose pair could not be created are left off the row.
#[instrument(skip_all, fields(backend = bk.name(), tags = row.plain_tags().len()))]
pub async fn populate_row_before_save<B>(bk: &B, row: &mut Row, known: &TagPairs) -> Result<TagPairs>
where
    B: Backend + ?Sized,
{
    let creation = create_tags_from_plain(bk, known, row.plain_tags())
        .await
        .context("creating tag pairs")?;

    let lookup: TagPairs = row
        .plain_tags()
        .iter()
        .filter_map(|plain| {
            creation
                .created
                .find_plain(plain)
                .or_else(|| known.find_plain(plain))
                .cloned()
        })
        .collect();

    let missing = row.set_random_tags(&lookup);
    if !missing.is_empty() {
        warn!(missing = missing.len(), "row will be saved without some of its tags");
    }

    row.encrypt(bk.key()).context("encrypting row")?;
    Ok(creation.created)
}

/// Decrypt a fetched row and resolve its plaintext tags from `pairs`
pub fn populate_row_after_get<B>(bk: &B, row: &mut Row, pairs: &TagPairs) -> Result<()>
where
    B: Backend + ?Sized,
{
    row.populate(bk.key(), pairs).context("decrypting row")
}

/// [`populate_row_after_get`] for every row
pub fn populate_rows_after_get<B>(bk: &B, rows: &mut Rows, pairs: &TagPairs) -> Result<()>
where
    B: Backend + ?Sized,
{
    for (i, row) in rows.iter_mut().enumerate() {
        row.populate(bk.key(), pairs)
            .with_context(|| format!("decrypting row {}", i))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::create_tag;
    use cryptag_backend::MemoryBackend;
    use cryptag_crypto::Key;

    #[tokio::test]
    async fn test_before_save_then_after_get() {
        let bk = MemoryBackend::new("mem", Key::generate());
        let known = TagPairs::from(vec![create_tag(&bk, "existing").await.unwrap()]);

        let mut row = Row::new("payload", &["new", "existing"]).unwrap();
        let created = populate_row_before_save(&bk, &mut row, &known).await.unwrap();
        assert_eq!(created.all_plain(), vec!["new"]);
        assert_eq!(row.random_tags.len(), 2);
        assert_eq!(row.random_tags[1], known[0].random);
        row.validate_for_save().unwrap();

        let mut all = known.clone();
        all.extend(created);
        let mut fetched = Row::from_stored(&row.row_key().unwrap(), row.to_stored());
        populate_row_after_get(&bk, &mut fetched, &all).unwrap();
        assert_eq!(fetched.decrypted(), b"payload");
        assert_eq!(fetched.plain_tags(), row.plain_tags());
    }

    #[tokio::test]
    async fn test_after_get_wrong_key() {
        let bk = MemoryBackend::new("mem", Key::generate());
        let mut row = Row::new("payload", &["t"]).unwrap();
        populate_row_before_save(&bk, &mut row, &TagPairs::new()).await.unwrap();

        let other = MemoryBackend::new("other", Key::generate());
        let mut rows = Rows::from(vec![Row::from_stored(&row.row_key().unwrap(), row.to_stored())]);
        let err = populate_rows_after_get(&other, &mut rows, &TagPairs::new()).unwrap_err();
        assert!(err.is_authentication_failure());
        assert!(err.to_string().starts_with("decrypting row 0"));
    }
}
