//! Helpers over populated rows: prefix lookups, sorting, version grouping

use crate::{Result, ResultExt};
use cryptag_backend::{
    row::{CREATED_PREFIX, ID_PREFIX, ORIG_VERSION_PREFIX},
    Row,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::highlevel::FILENAME_PREFIX;

/// The first plaintext tag starting with one of `prefixes`, trying the
/// prefixes in order.
///
/// `tag_with_prefix(row, &["filename:", "id:"])` yields the row's filename
/// tag if it has one, else its id tag.
pub fn tag_with_prefix<'a>(row: &'a Row, prefixes: &[&str]) -> Option<&'a str> {
    prefixes.iter().find_map(|prefix| {
        row.plain_tags()
            .iter()
            .find(|t| t.starts_with(prefix))
            .map(String::as_str)
    })
}

/// [`tag_with_prefix`] with the matched prefix removed
pub fn tag_with_prefix_stripped<'a>(row: &'a Row, prefixes: &[&str]) -> Option<&'a str> {
    prefixes.iter().find_map(|prefix| {
        row.plain_tags()
            .iter()
            .find_map(|t| t.strip_prefix(prefix))
    })
}

/// Every plaintext tag starting with `prefix`
pub fn tags_with_prefix<'a>(row: &'a Row, prefix: &str) -> Vec<&'a str> {
    row.plain_tags()
        .iter()
        .filter(|t| t.starts_with(prefix))
        .map(String::as_str)
        .collect()
}

/// [`tags_with_prefix`] with the prefix removed
pub fn tags_with_prefix_stripped<'a>(row: &'a Row, prefix: &str) -> Vec<&'a str> {
    row.plain_tags()
        .iter()
        .filter_map(|t| t.strip_prefix(prefix))
        .collect()
}

/// Compare rows by their tag with `prefix` (e.g. `created:`)
pub fn by_tag_prefix(prefix: &str, ascending: bool) -> impl Fn(&Row, &Row) -> Ordering + '_ {
    move |a, b| {
        let ord = tag_with_prefix(a, &[prefix]).cmp(&tag_with_prefix(b, &[prefix]));
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    }
}

/// Group rows into version chains.
///
/// Rows are grouped by the id of the first version (their
/// `origversionrow:` tag, or their own `id:` tag). Each group is ordered
/// oldest first by `created:`; the groups are ordered by comparing their
/// newest members with `compare`. Rows with no id are skipped.
pub fn to_versioned_rows<F>(rows: &[Row], compare: F) -> Vec<Vec<Row>>
where
    F: Fn(&Row, &Row) -> Ordering,
{
    let mut sorted = rows.to_vec();
    sorted.sort_by(by_tag_prefix(CREATED_PREFIX, true));

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Row>> = HashMap::new();
    for row in sorted {
        let Some(tag) = tag_with_prefix(&row, &[ORIG_VERSION_PREFIX, ID_PREFIX]) else {
            warn!(tags = row.plain_tags().len(), "row has no id tag; skipping");
            continue;
        };
        let group = tag.strip_prefix(ORIG_VERSION_PREFIX).unwrap_or(tag).to_string();
        if !groups.contains_key(&group) {
            order.push(group.clone());
        }
        groups.entry(group).or_default().push(row);
    }

    let mut versioned: Vec<Vec<Row>> = order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect();
    versioned.sort_by(|a, b| match (a.last(), b.last()) {
        (Some(a), Some(b)) => compare(a, b),
        _ => Ordering::Equal,
    });
    versioned
}

/// Write the row's payload into `dir` and return the file path.
///
/// The file is named after the row's `filename:` tag, else its `id:` tag,
/// else the current Unix time.
pub async fn save_as_file(row: &Row, dir: &Path) -> Result<PathBuf> {
    let name = tag_with_prefix_stripped(row, &[FILENAME_PREFIX, ID_PREFIX])
        .and_then(|n| Path::new(n).file_name())
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| {
            warn!("row has no filename or id tag; naming file by timestamp");
            chrono::Utc::now().timestamp().to_string().into()
        });

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(dir)
        .await
        .with_context(|| format!("creating directory {}", dir.display()))?;

    let path = dir.join(name);
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(&path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(row.decrypted()).await?;
    file.flush().await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn row(tags: &[&str]) -> Row {
        Row::new(Vec::<u8>::new(), tags).unwrap()
    }

    fn ids(groups: &[Vec<Row>]) -> Vec<Vec<&str>> {
        groups
            .iter()
            .map(|g| g.iter().map(|r| tag_with_prefix(r, &[ID_PREFIX]).unwrap()).collect())
            .collect()
    }

    #[test]
    fn test_tag_with_prefix_prefers_order() {
        let r = row(&["id:42", "filename:a.txt", "type:file"]);
        assert_eq!(tag_with_prefix(&r, &["filename:", "id:"]), Some("filename:a.txt"));
        assert_eq!(tag_with_prefix_stripped(&r, &["filename:", "id:"]), Some("a.txt"));
        assert_eq!(tag_with_prefix_stripped(&r, &["nope:", "id:"]), Some("42"));
        assert_eq!(tag_with_prefix(&r, &["nope:"]), None);
    }

    #[test]
    fn test_tags_with_prefix() {
        let r = row(&["type:file", "id:1", "type:pdf"]);
        assert_eq!(tags_with_prefix(&r, "type:"), vec!["type:file", "type:pdf"]);
        assert_eq!(tags_with_prefix_stripped(&r, "type:"), vec!["file", "pdf"]);
        assert!(tags_with_prefix(&r, "x:").is_empty());
    }

    #[rstest]
    #[case("tag:", &["tag:02", "tag:01", "tag:04", "tag:03"])]
    #[case("created:", &[
        "created:20160605100238-2",
        "created:20160605100227-1",
        "created:20160605134527-4",
        "created:20160605132634-3",
    ])]
    fn test_by_tag_prefix(#[case] prefix: &str, #[case] tags: &[&str]) {
        let mut rows: Vec<Row> = tags.iter().map(|t| row(&[t])).collect();

        rows.sort_by(by_tag_prefix(prefix, true));
        let got: Vec<&str> = rows.iter().map(|r| r.plain_tags()[0].as_str()).collect();
        let mut want = tags.to_vec();
        want.sort_unstable();
        assert_eq!(got, want);

        rows.sort_by(by_tag_prefix(prefix, false));
        let got: Vec<&str> = rows.iter().map(|r| r.plain_tags()[0].as_str()).collect();
        want.reverse();
        assert_eq!(got, want);
    }

    fn version_fixture() -> Vec<Row> {
        vec![
            row(&["id:00", "created:0000"]),
            row(&["id:01", "created:0001", "origversionrow:id:00"]),
            row(&["id:02", "created:0002"]),
            row(&["id:03", "created:0003", "origversionrow:id:00"]),
            row(&["id:04", "created:0004", "origversionrow:id:00"]),
            row(&["id:05", "created:0005", "origversionrow:id:DELETED"]),
            row(&["id:06", "created:0006"]),
            row(&["id:07", "created:0007", "origversionrow:id:06"]),
        ]
    }

    #[rstest]
    #[case(vec![0, 1, 2, 3, 4, 5, 6, 7])]
    #[case(vec![1, 3, 0, 4, 7, 5, 2, 6])]
    fn test_to_versioned_rows(#[case] order: Vec<usize>) {
        let fixture = version_fixture();
        let rows: Vec<Row> = order.iter().map(|&i| fixture[i].clone()).collect();

        let asc = to_versioned_rows(&rows, by_tag_prefix(CREATED_PREFIX, true));
        assert_eq!(
            ids(&asc),
            vec![
                vec!["id:02"],
                vec!["id:00", "id:01", "id:03", "id:04"],
                vec!["id:05"],
                vec!["id:06", "id:07"],
            ]
        );

        let desc = to_versioned_rows(&rows, by_tag_prefix(CREATED_PREFIX, false));
        assert_eq!(
            ids(&desc),
            vec![
                vec!["id:06", "id:07"],
                vec!["id:05"],
                vec!["id:00", "id:01", "id:03", "id:04"],
                vec!["id:02"],
            ]
        );

        // input untouched
        assert_eq!(rows.len(), 8);
    }

    #[test]
    fn test_versioned_skips_rows_without_id() {
        let rows = vec![row(&["note"]), row(&["id:1", "created:1"])];
        let groups = to_versioned_rows(&rows, by_tag_prefix(CREATED_PREFIX, true));
        assert_eq!(groups.len(), 1);
    }

    #[tokio::test]
    async fn test_save_as_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("decrypted");

        let r = Row::new("contents", &["filename:../../escape.txt", "id:9"]).unwrap();
        let path = save_as_file(&r, &out).await.unwrap();
        assert_eq!(path, out.join("escape.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"contents");

        let r = Row::new("by id", &["id:abc"]).unwrap();
        let path = save_as_file(&r, &out).await.unwrap();
        assert_eq!(path, out.join("abc"));
    }
}
