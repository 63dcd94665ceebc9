//! Row creation and versioned updates

use crate::{
    populate::populate_row_before_save,
    query::list_rows_from_plain_tags,
    rowutil::tag_with_prefix,
    tags::known_pairs,
    CoreError, Result, ResultExt,
};
use cryptag_backend::{
    row::{ALL_TAG, CREATED_PREFIX, ID_PREFIX, ORIG_VERSION_PREFIX},
    Backend, Row, TagPairs,
};
use cryptag_crypto::Key;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, instrument};

/// Tag marking a row whose payload is a file
pub const FILE_TYPE_TAG: &str = "type:file";

/// Prefix of the tag holding a file row's base name
pub const FILENAME_PREFIX: &str = "filename:";

/// Prefix of type tags (`type:file`, `type:pdf`, ...)
pub const TYPE_PREFIX: &str = "type:";

/// Create and save a row tagged exactly `plaintags`.
///
/// A previous row with exactly these tags is replaced; see
/// [`create_tracked_row`] for rows that must not collide.
#[instrument(skip_all, fields(backend = bk.name(), tags = plaintags.len()))]
pub async fn create_row<B, S>(
    bk: &B,
    pairs: Option<&TagPairs>,
    data: impl Into<Vec<u8>>,
    plaintags: &[S],
) -> Result<Row>
where
    B: Backend + ?Sized,
    S: AsRef<str>,
{
    let row = Row::new(data, plaintags)?;
    save_new_row(bk, pairs, row).await
}

/// Create and save a row tagged `plaintags` plus `id:`, `created:` and
/// `all` bookkeeping tags
#[instrument(skip_all, fields(backend = bk.name(), tags = plaintags.len()))]
pub async fn create_tracked_row<B, S>(
    bk: &B,
    pairs: Option<&TagPairs>,
    data: impl Into<Vec<u8>>,
    plaintags: &[S],
) -> Result<Row>
where
    B: Backend + ?Sized,
    S: AsRef<str>,
{
    let row = Row::new_tracked(data, plaintags)?;
    save_new_row(bk, pairs, row).await
}

/// Create a row whose payload is `value` serialized as JSON
pub async fn create_json_row<B, T, S>(
    bk: &B,
    pairs: Option<&TagPairs>,
    value: &T,
    plaintags: &[S],
) -> Result<Row>
where
    B: Backend + ?Sized,
    T: Serialize + ?Sized,
    S: AsRef<str>,
{
    let data = serde_json::to_vec(value)?;
    create_row(bk, pairs, data, plaintags).await
}

/// Create a tracked row holding the contents of the file at `path`.
///
/// Adds `type:file`, `filename:<base name>` and `type:<extension>`.
#[instrument(skip_all, fields(backend = bk.name(), path = %path.as_ref().display()))]
pub async fn create_file_row<B, S>(
    bk: &B,
    pairs: Option<&TagPairs>,
    path: impl AsRef<Path>,
    plaintags: &[S],
) -> Result<Row>
where
    B: Backend + ?Sized,
    S: AsRef<str>,
{
    let path = path.as_ref();
    let data = read_file(path).await?;

    let mut tags: Vec<String> = plaintags.iter().map(|t| t.as_ref().to_string()).collect();
    tags.push(FILE_TYPE_TAG.to_string());
    tags.extend(file_tags(path)?);
    create_tracked_row(bk, pairs, data, &tags).await
}

/// Save a new version of the single row tagged `prev_id_tag`, keeping its
/// tags
#[instrument(skip_all, fields(backend = bk.name()))]
pub async fn update_row<B>(
    bk: &B,
    pairs: Option<&TagPairs>,
    prev_id_tag: &str,
    new_data: impl Into<Vec<u8>>,
) -> Result<Row>
where
    B: Backend + ?Sized,
{
    let pairs = known_pairs(bk, pairs).await?;
    let old = unique_row(bk, &pairs, prev_id_tag).await?;
    update_row_advanced(bk, Some(&*pairs), &old, new_data, old.plain_tags()).await
}

/// Save a new version of `old` tagged `new_tags`.
///
/// `id:`, `created:` and `all` are replaced with fresh ones. The new row
/// points at the first version of the chain with an `origversionrow:` tag,
/// kept from `new_tags` if present, else `old`'s own id.
#[instrument(skip_all, fields(backend = bk.name(), tags = new_tags.len()))]
pub async fn update_row_advanced<B, S>(
    bk: &B,
    pairs: Option<&TagPairs>,
    old: &Row,
    new_data: impl Into<Vec<u8>>,
    new_tags: &[S],
) -> Result<Row>
where
    B: Backend + ?Sized,
    S: AsRef<str>,
{
    let tags = version_tags(old, new_tags);
    create_tracked_row(bk, pairs, new_data, &tags).await
}

/// Save the file at `new_path` as a new version of the single file row
/// tagged `prev_id_tag`, swapping its `filename:` and extension tags
#[instrument(skip_all, fields(backend = bk.name(), path = %new_path.as_ref().display()))]
pub async fn update_file_row<B>(
    bk: &B,
    pairs: Option<&TagPairs>,
    prev_id_tag: &str,
    new_path: impl AsRef<Path>,
) -> Result<Row>
where
    B: Backend + ?Sized,
{
    let new_path = new_path.as_ref();
    let pairs = known_pairs(bk, pairs).await?;
    let old = unique_row(bk, &pairs, prev_id_tag).await?;

    if !old.has_plain_tag(FILE_TYPE_TAG) {
        return Err(CoreError::NotAFile(format!(
            "row {} has no `{}` tag",
            prev_id_tag, FILE_TYPE_TAG
        )));
    }

    let old_ext_tag = tag_with_prefix(&old, &[FILENAME_PREFIX])
        .and_then(|t| extension_of(Path::new(&t[FILENAME_PREFIX.len()..])))
        .map(|ext| format!("{}{}", TYPE_PREFIX, ext));

    let mut tags: Vec<String> = old
        .plain_tags()
        .iter()
        .filter(|t| !t.starts_with(FILENAME_PREFIX) && Some(t.as_str()) != old_ext_tag.as_deref())
        .cloned()
        .collect();
    tags.extend(file_tags(new_path)?);

    let data = read_file(new_path).await?;
    update_row_advanced(bk, Some(&*pairs), &old, data, &tags).await
}

/// Replace the key in the saved config of `bk`, backing up the old config.
///
/// Existing tags and rows are not re-encrypted.
pub fn update_key<B>(bk: &B, new_key: Key, config_dir: &Path) -> Result<()>
where
    B: Backend + ?Sized,
{
    let mut config = bk.to_config()?;
    config.key = Some(new_key);
    config.update(config_dir).context("updating backend config")?;
    debug!(backend = bk.name(), "updated backend key");
    Ok(())
}

/// Tags of a new version of `old`: `new_tags` without bookkeeping tags,
/// plus an `origversionrow:` tag pointing at the first version
pub(crate) fn version_tags<S: AsRef<str>>(old: &Row, new_tags: &[S]) -> Vec<String> {
    let mut orig_tag = None;
    let mut tags = Vec::with_capacity(new_tags.len() + 1);
    for tag in new_tags {
        let tag = tag.as_ref();
        if tag.starts_with(ID_PREFIX) || tag.starts_with(CREATED_PREFIX) || tag == ALL_TAG {
            continue;
        }
        if tag.starts_with(ORIG_VERSION_PREFIX) {
            orig_tag = Some(tag.to_string());
            continue;
        }
        tags.push(tag.to_string());
    }

    let orig_tag = match orig_tag {
        Some(tag) => tag,
        None => {
            let old_id = tag_with_prefix(old, &[ID_PREFIX]).unwrap_or_default();
            format!("{}{}", ORIG_VERSION_PREFIX, old_id)
        }
    };
    tags.push(orig_tag);
    tags
}

async fn save_new_row<B>(bk: &B, pairs: Option<&TagPairs>, mut row: Row) -> Result<Row>
where
    B: Backend + ?Sized,
{
    let known = known_pairs(bk, pairs).await?;
    populate_row_before_save(bk, &mut row, &known).await?;
    bk.save_row(&row).await.context("saving row")?;
    debug!(bytes = row.decrypted().len(), "saved row");
    Ok(row)
}

pub(crate) async fn unique_row<B>(bk: &B, pairs: &TagPairs, tag: &str) -> Result<Row>
where
    B: Backend + ?Sized,
{
    let rows = list_rows_from_plain_tags(bk, Some(pairs), &[tag]).await?;
    if rows.len() != 1 {
        return Err(CoreError::RowNotUnique {
            tag: tag.to_string(),
            count: rows.len(),
        });
    }
    let mut rows = rows.into_vec();
    rows.pop().ok_or(CoreError::RowNotUnique {
        tag: tag.to_string(),
        count: 0,
    })
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    if !meta.is_file() {
        return Err(CoreError::NotAFile(path.display().to_string()));
    }
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

/// `filename:<base>` and, when there is an extension, `type:<ext>`
fn file_tags(path: &Path) -> Result<Vec<String>> {
    let base = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| CoreError::NotAFile(path.display().to_string()))?;
    let mut tags = vec![format!("{}{}", FILENAME_PREFIX, base)];
    if let Some(ext) = extension_of(path) {
        tags.push(format!("{}{}", TYPE_PREFIX, ext));
    }
    Ok(tags)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::rows_from_plain_tags;
    use crate::rowutil::tag_with_prefix_stripped;
    use cryptag_backend::MemoryBackend;

    #[tokio::test]
    async fn test_create_json_row() {
        let bk = MemoryBackend::new("mem", Key::generate());
        #[derive(Serialize)]
        struct Login<'a> {
            user: &'a str,
            site: &'a str,
        }
        create_json_row(&bk, None, &Login { user: "me", site: "example.com" }, &["type:login"])
            .await
            .unwrap();

        let rows = rows_from_plain_tags(&bk, None, &["type:login"]).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(rows[0].decrypted()).unwrap();
        assert_eq!(value["site"], "example.com");
    }

    #[tokio::test]
    async fn test_update_row_chains_versions() {
        let bk = MemoryBackend::new("mem", Key::generate());
        let first = create_tracked_row(&bk, None, "v1", &["note"]).await.unwrap();
        let first_id = tag_with_prefix(&first, &[ID_PREFIX]).unwrap().to_string();

        let second = update_row(&bk, None, &first_id, "v2").await.unwrap();
        let second_id = tag_with_prefix(&second, &[ID_PREFIX]).unwrap().to_string();
        assert_ne!(first_id, second_id);
        assert!(second.has_plain_tag("note"));
        assert!(second.has_plain_tag(&format!("{}{}", ORIG_VERSION_PREFIX, first_id)));

        let third = update_row(&bk, None, &second_id, "v3").await.unwrap();
        assert!(third.has_plain_tag(&format!("{}{}", ORIG_VERSION_PREFIX, first_id)));
        assert_eq!(
            third.plain_tags().iter().filter(|t| t.starts_with(ORIG_VERSION_PREFIX)).count(),
            1
        );

        let all = rows_from_plain_tags(&bk, None, &["note"]).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_update_row_requires_unique_match() {
        let bk = MemoryBackend::new("mem", Key::generate());
        create_tracked_row(&bk, None, "a", &["dup"]).await.unwrap();
        create_tracked_row(&bk, None, "b", &["dup"]).await.unwrap();

        let err = update_row(&bk, None, "dup", "c").await.unwrap_err();
        assert!(matches!(err, CoreError::RowNotUnique { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_file_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let notes = dir.path().join("notes.TXT");
        std::fs::write(&notes, b"first draft").unwrap();

        let bk = MemoryBackend::new("mem", Key::generate());
        let row = create_file_row(&bk, None, &notes, &["project"]).await.unwrap();
        assert!(row.has_plain_tag(FILE_TYPE_TAG));
        assert!(row.has_plain_tag("filename:notes.TXT"));
        assert!(row.has_plain_tag("type:txt"));
        let id = tag_with_prefix(&row, &[ID_PREFIX]).unwrap().to_string();

        let report = dir.path().join("report.md");
        std::fs::write(&report, b"# final").unwrap();
        let updated = update_file_row(&bk, None, &id, &report).await.unwrap();
        assert_eq!(updated.decrypted(), b"# final");
        assert!(updated.has_plain_tag("project"));
        assert!(updated.has_plain_tag("type:md"));
        assert!(!updated.has_plain_tag("type:txt"));
        assert_eq!(
            tag_with_prefix_stripped(&updated, &[FILENAME_PREFIX]),
            Some("report.md")
        );
    }

    #[tokio::test]
    async fn test_update_file_row_rejects_plain_rows() {
        let bk = MemoryBackend::new("mem", Key::generate());
        let row = create_tracked_row(&bk, None, "x", &["note"]).await.unwrap();
        let id = tag_with_prefix(&row, &[ID_PREFIX]).unwrap().to_string();
        let err = update_file_row(&bk, None, &id, "/nonexistent").await.unwrap_err();
        assert!(matches!(err, CoreError::NotAFile(_)));
    }

    #[tokio::test]
    async fn test_create_file_row_rejects_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let bk = MemoryBackend::new("mem", Key::generate());
        let empty: [&str; 0] = [];
        let err = create_file_row(&bk, None, dir.path(), &empty).await.unwrap_err();
        assert!(matches!(err, CoreError::NotAFile(_)));
    }
}
