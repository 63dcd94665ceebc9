//! Rows: an encrypted payload and the random tags that index it

use crate::{
    row_key::RowKey,
    tag_pair::TagPairs,
    BackendError, Result,
};
use cryptag_crypto::{decrypt, seal, Key, Nonce};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// Prefix of the unique identifier tag
pub const ID_PREFIX: &str = "id:";

/// Prefix of the creation timestamp tag
pub const CREATED_PREFIX: &str = "created:";

/// Tag every tracked row carries
pub const ALL_TAG: &str = "all";

/// Prefix of the tag pointing a newer version at the row it replaces
pub const ORIG_VERSION_PREFIX: &str = "origversionrow:";

/// Layout of `created:` timestamps
pub const CREATED_FORMAT: &str = "%Y%m%d%H%M%S";

/// The persisted form of a row (its random tags are its storage name)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRow {
    /// Encrypted payload
    #[serde(with = "crate::base64_serde")]
    pub data: Vec<u8>,
    /// Nonce the payload was sealed with
    pub nonce: Nonce,
}

/// A unit of user data
///
/// `encrypted`, `random_tags` and `nonce` are what a backend sees. The
/// decrypted payload and plaintext tags live only on the client.
#[derive(Clone, Default)]
pub struct Row {
    pub encrypted: Vec<u8>,
    pub random_tags: Vec<String>,
    pub nonce: Nonce,
    decrypted: Option<Vec<u8>>,
    plain_tags: Vec<String>,
}

impl Row {
    /// A new, not yet encrypted row.
    ///
    /// Duplicate tags are dropped; at least one non-empty tag is required.
    ///
    /// The storage key comes from the tags alone, so saving a second row
    /// with the same tags replaces the first. Use [`Row::new_tracked`] for
    /// rows that must coexist.
    pub fn new<S: AsRef<str>>(data: impl Into<Vec<u8>>, plaintags: &[S]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut tags = Vec::with_capacity(plaintags.len());
        for tag in plaintags {
            let tag = tag.as_ref();
            if tag.is_empty() {
                return Err(BackendError::Validation("row has an empty tag".into()));
            }
            if seen.insert(tag) {
                tags.push(tag.to_string());
            }
        }
        if tags.is_empty() {
            return Err(BackendError::Validation("row needs at least one tag".into()));
        }
        Ok(Self {
            decrypted: Some(data.into()),
            plain_tags: tags,
            ..Default::default()
        })
    }

    /// Like [`Row::new`], adding `id:<uuid>`, `created:<timestamp>` and
    /// `all` unless the caller already supplied them.
    pub fn new_tracked<S: AsRef<str>>(data: impl Into<Vec<u8>>, plaintags: &[S]) -> Result<Self> {
        let mut tags: Vec<String> = plaintags.iter().map(|t| t.as_ref().to_string()).collect();
        if !tags.iter().any(|t| t.starts_with(ID_PREFIX)) {
            tags.push(format!("{}{}", ID_PREFIX, uuid::Uuid::new_v4()));
        }
        if !tags.iter().any(|t| t.starts_with(CREATED_PREFIX)) {
            tags.push(format!(
                "{}{}",
                CREATED_PREFIX,
                chrono::Utc::now().format(CREATED_FORMAT)
            ));
        }
        if !tags.iter().any(|t| t == ALL_TAG) {
            tags.push(ALL_TAG.to_string());
        }
        Self::new(data, &tags)
    }

    /// Rebuild a row from storage; call [`Row::populate`] to read it
    pub fn from_stored(key: &RowKey, stored: StoredRow) -> Self {
        Self {
            encrypted: stored.data,
            random_tags: key.tags(),
            nonce: stored.nonce,
            ..Default::default()
        }
    }

    /// A row known only by its storage name (no payload loaded)
    pub fn listed(key: &RowKey) -> Self {
        Self {
            random_tags: key.tags(),
            ..Default::default()
        }
    }

    /// The persisted form
    pub fn to_stored(&self) -> StoredRow {
        StoredRow {
            data: self.encrypted.clone(),
            nonce: self.nonce,
        }
    }

    /// The storage name for this row
    pub fn row_key(&self) -> Result<RowKey> {
        RowKey::from_tags(&self.random_tags)
    }

    /// The decrypted payload, empty when not decrypted
    pub fn decrypted(&self) -> &[u8] {
        self.decrypted.as_deref().unwrap_or_default()
    }

    pub fn is_decrypted(&self) -> bool {
        self.decrypted.is_some()
    }

    pub fn plain_tags(&self) -> &[String] {
        &self.plain_tags
    }

    pub fn has_plain_tag(&self, plain: &str) -> bool {
        self.plain_tags.iter().any(|t| t == plain)
    }

    pub fn has_random_tag(&self, random: &str) -> bool {
        self.random_tags.iter().any(|t| t == random)
    }

    /// Seal the payload under `key` with a fresh nonce
    pub fn encrypt(&mut self, key: &Key) -> Result<()> {
        let plaintext = self
            .decrypted
            .as_deref()
            .ok_or_else(|| BackendError::Validation("row has no payload to encrypt".into()))?;
        let (nonce, encrypted) = seal(plaintext, key)?;
        self.encrypted = encrypted;
        self.nonce = nonce;
        Ok(())
    }

    /// Decrypt the payload. Fails closed on any tampering or a wrong key.
    pub fn decrypt_data(&mut self, key: &Key) -> Result<()> {
        let plaintext = decrypt(&self.encrypted, &self.nonce, key)?;
        self.decrypted = Some(plaintext);
        Ok(())
    }

    /// Replace the random tags with those of `pairs` matching this row's
    /// plaintext tags, in plaintext-tag order. Returns the labels that had
    /// no pair.
    pub fn set_random_tags(&mut self, pairs: &TagPairs) -> Vec<String> {
        let mut random = Vec::with_capacity(self.plain_tags.len());
        let mut missing = Vec::new();
        for plain in &self.plain_tags {
            match pairs.find_plain(plain) {
                Some(pair) => random.push(pair.random.clone()),
                None => missing.push(plain.clone()),
            }
        }
        self.random_tags = random;
        missing
    }

    /// Derive the plaintext tags from the random tags via `pairs`.
    ///
    /// Random tags with no decrypted pair are left out.
    pub fn set_plain_tags(&mut self, pairs: &TagPairs) {
        self.plain_tags = self
            .random_tags
            .iter()
            .filter_map(|r| pairs.find_random(r).and_then(|p| p.plain()))
            .map(str::to_string)
            .collect();
        if self.plain_tags.len() != self.random_tags.len() {
            tracing::debug!(
                resolved = self.plain_tags.len(),
                total = self.random_tags.len(),
                "row has random tags with no known tag pair"
            );
        }
    }

    /// Decrypt the payload (unless already decrypted) and resolve the
    /// plaintext tags
    pub fn populate(&mut self, key: &Key, pairs: &TagPairs) -> Result<()> {
        if self.decrypted.is_none() {
            self.decrypt_data(key)?;
        }
        self.set_plain_tags(pairs);
        Ok(())
    }

    /// Check the row is fit to persist
    pub fn validate_for_save(&self) -> Result<()> {
        if self.encrypted.is_empty() {
            return Err(BackendError::Validation("row has no encrypted payload".into()));
        }
        if self.random_tags.is_empty() {
            return Err(BackendError::Validation("row has no random tags".into()));
        }
        if self.nonce.is_zero() {
            return Err(BackendError::Validation("row has no nonce".into()));
        }
        Ok(())
    }

    /// `payload<TAB>tag1  tag2\n`
    pub fn format(&self) -> String {
        format!(
            "{}\t{}\n",
            String::from_utf8_lossy(self.decrypted()),
            self.plain_tags.join("  ")
        )
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row")
            .field("encrypted_len", &self.encrypted.len())
            .field("random_tags", &self.random_tags)
            .field("decrypted", &self.decrypted.is_some())
            .field("plain_tags", &self.plain_tags)
            .finish()
    }
}

/// An ordered collection of rows
#[derive(Clone, Debug, Default)]
pub struct Rows(Vec<Row>);

impl Rows {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, row: Row) {
        self.0.push(row);
    }

    pub fn into_vec(self) -> Vec<Row> {
        self.0
    }

    /// Rows carrying every tag in `random`
    pub fn filter_by_random_tags<S: AsRef<str>>(&self, random: &[S]) -> Rows {
        self.0
            .iter()
            .filter(|row| random.iter().all(|t| row.has_random_tag(t.as_ref())))
            .cloned()
            .collect()
    }

    /// Rows carrying none of the tags in `random`
    pub fn exclude_by_random_tags<S: AsRef<str>>(&self, random: &[S]) -> Rows {
        self.0
            .iter()
            .filter(|row| !random.iter().any(|t| row.has_random_tag(t.as_ref())))
            .cloned()
            .collect()
    }

    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Row, &Row) -> Ordering,
    {
        self.0.sort_by(compare);
    }

    /// Decrypt every payload and resolve every row's plaintext tags
    pub fn populate(&mut self, key: &Key, pairs: &TagPairs) -> Result<()> {
        for row in &mut self.0 {
            row.populate(key, pairs)?;
        }
        Ok(())
    }

    /// Resolve plaintext tags only (payloads untouched)
    pub fn set_plain_tags(&mut self, pairs: &TagPairs) {
        for row in &mut self.0 {
            row.set_plain_tags(pairs);
        }
    }
}

impl std::ops::Deref for Rows {
    type Target = [Row];

    fn deref(&self) -> &[Row] {
        &self.0
    }
}

impl std::ops::DerefMut for Rows {
    fn deref_mut(&mut self) -> &mut [Row] {
        &mut self.0
    }
}

impl From<Vec<Row>> for Rows {
    fn from(rows: Vec<Row>) -> Self {
        Self(rows)
    }
}

impl FromIterator<Row> for Rows {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Rows {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
