//! Row keys: a row's random tags encoded as its storage name
//!
//! The key doubles as the index. Listing stored names and decoding each one
//! back into its tag set is enough to answer a superset query without
//! reading any row bodies.

use crate::{BackendError, Result};
use std::collections::HashSet;
use std::fmt;

/// Separator between random tags in a row key
pub const TAG_DELIMITER: char = '-';

/// Reject tokens that could not round-trip through a row key or that
/// would escape a storage directory.
pub fn validate_random_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(BackendError::Validation("empty random tag".into()));
    }
    if tag.contains(TAG_DELIMITER) {
        return Err(BackendError::Validation(format!(
            "random tag `{}` contains the delimiter `{}`",
            tag, TAG_DELIMITER
        )));
    }
    if tag.starts_with('.') || tag.contains(['/', '\\']) || tag.contains(char::is_whitespace) {
        return Err(BackendError::Validation(format!(
            "random tag `{}` is not a valid storage name",
            tag
        )));
    }
    Ok(())
}

/// The storage name of a row
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RowKey(String);

impl RowKey {
    /// Encode a row's random tags, preserving their order
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Result<Self> {
        if tags.is_empty() {
            return Err(BackendError::Validation("row has no random tags".into()));
        }
        for tag in tags {
            validate_random_tag(tag.as_ref())?;
        }
        let joined = tags
            .iter()
            .map(|t| t.as_ref())
            .collect::<Vec<_>>()
            .join(&TAG_DELIMITER.to_string());
        Ok(Self(joined))
    }

    /// Decode a stored name
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() || name.split(TAG_DELIMITER).any(|t| validate_random_tag(t).is_err()) {
            return Err(BackendError::InvalidRowKey(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The random tags, in stored order
    pub fn tags(&self) -> Vec<String> {
        self.0.split(TAG_DELIMITER).map(str::to_string).collect()
    }

    /// Whether this row carries every tag in `query`
    pub fn contains_all<S: AsRef<str>>(&self, query: &[S]) -> bool {
        let have: HashSet<&str> = self.0.split(TAG_DELIMITER).collect();
        query.iter().all(|t| have.contains(t.as_ref()))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_encode_decode() {
        let key = RowKey::from_tags(&["abc123xyz", "def456uvw"]).unwrap();
        assert_eq!(key.as_str(), "abc123xyz-def456uvw");
        let parsed = RowKey::parse(key.as_str()).unwrap();
        assert_eq!(parsed.tags(), vec!["abc123xyz", "def456uvw"]);
    }

    #[test]
    fn test_contains_all_is_superset_match() {
        let key = RowKey::parse("aaa-bbb-ccc").unwrap();
        assert!(key.contains_all(&["aaa"]));
        assert!(key.contains_all(&["ccc", "aaa"]));
        assert!(!key.contains_all(&["aaa", "ddd"]));
        assert!(!key.contains_all(&["aa"]));
    }

    #[rstest]
    #[case("")]
    #[case("aaa--bbb")]
    #[case("-aaa")]
    #[case("../etc")]
    #[case(".hidden")]
    #[case("a b")]
    fn test_parse_rejects(#[case] name: &str) {
        assert!(matches!(RowKey::parse(name), Err(BackendError::InvalidRowKey(_))));
    }

    #[test]
    fn test_from_tags_rejects() {
        let empty: [&str; 0] = [];
        assert!(RowKey::from_tags(&empty).is_err());
        assert!(RowKey::from_tags(&["ok", "bad-tag"]).is_err());
        assert!(RowKey::from_tags(&["a/b"]).is_err());
    }
}
