//! Tag pairs: the binding between a random tag and an encrypted label
//!
//! A backend stores each pair under its random tag. Only the ciphertext of
//! the label and its nonce are persisted; the plaintext is derived on the
//! client by decrypting with the backend key.

use crate::{BackendError, Result};
use cryptag_crypto::{decrypt, random_tag, seal, Key, Nonce};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The persisted form of a tag pair (the random tag is its storage name)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredTagPair {
    /// Encrypted plaintext label
    #[serde(with = "crate::base64_serde")]
    pub plain_encrypted: Vec<u8>,
    /// Nonce the label was sealed with
    pub nonce: Nonce,
}

/// A random tag bound to an encrypted plaintext label
#[derive(Clone, Debug)]
pub struct TagPair {
    /// Opaque token stored in place of the label
    pub random: String,
    /// Ciphertext of the label
    pub plain_encrypted: Vec<u8>,
    /// Nonce used to seal `plain_encrypted`
    pub nonce: Nonce,
    plain: Option<String>,
}

impl TagPair {
    /// Build a pair whose plaintext is already known
    pub fn new(
        random: impl Into<String>,
        plain_encrypted: Vec<u8>,
        nonce: Nonce,
        plain: impl Into<String>,
    ) -> Self {
        Self {
            random: random.into(),
            plain_encrypted,
            nonce,
            plain: Some(plain.into()),
        }
    }

    /// Seal `plain` under `key` with a fresh random tag and nonce
    pub fn seal(plain: &str, key: &Key) -> Result<Self> {
        let (nonce, plain_encrypted) = seal(plain.as_bytes(), key)?;
        Ok(Self::new(random_tag(), plain_encrypted, nonce, plain))
    }

    /// Rebuild a pair from storage. The plaintext stays unknown until
    /// [`TagPair::decrypt`] is called.
    pub fn from_stored(random: impl Into<String>, stored: StoredTagPair) -> Self {
        Self {
            random: random.into(),
            plain_encrypted: stored.plain_encrypted,
            nonce: stored.nonce,
            plain: None,
        }
    }

    /// The persisted form
    pub fn to_stored(&self) -> StoredTagPair {
        StoredTagPair {
            plain_encrypted: self.plain_encrypted.clone(),
            nonce: self.nonce,
        }
    }

    /// The plaintext label, if decrypted
    pub fn plain(&self) -> Option<&str> {
        self.plain.as_deref()
    }

    /// Whether the plaintext has been derived
    pub fn is_decrypted(&self) -> bool {
        self.plain.is_some()
    }

    /// Derive the plaintext label from the ciphertext.
    ///
    /// Safe to call repeatedly; the plaintext is always re-derived from the
    /// ciphertext, never trusted from a previous value.
    pub fn decrypt(&mut self, key: &Key) -> Result<()> {
        let bytes = decrypt(&self.plain_encrypted, &self.nonce, key)?;
        let plain = String::from_utf8(bytes)
            .map_err(|_| BackendError::Validation("tag label is not valid UTF-8".into()))?;
        self.plain = Some(plain);
        Ok(())
    }

    /// Check the pair is fit to persist
    pub fn validate(&self) -> Result<()> {
        if self.random.is_empty() {
            return Err(BackendError::Validation("tag pair has empty random tag".into()));
        }
        if self.plain_encrypted.is_empty() {
            return Err(BackendError::Validation("tag pair has empty ciphertext".into()));
        }
        if self.nonce.is_zero() {
            return Err(BackendError::Validation("tag pair has no nonce".into()));
        }
        Ok(())
    }
}

/// An ordered collection of tag pairs
#[derive(Clone, Debug, Default)]
pub struct TagPairs(Vec<TagPair>);

impl TagPairs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, pair: TagPair) {
        self.0.push(pair);
    }

    pub fn extend(&mut self, pairs: impl IntoIterator<Item = TagPair>) {
        self.0.extend(pairs);
    }

    pub fn into_vec(self) -> Vec<TagPair> {
        self.0
    }

    /// Plaintext labels of every decrypted pair
    pub fn all_plain(&self) -> Vec<&str> {
        self.0.iter().filter_map(|p| p.plain()).collect()
    }

    /// Random tags of every pair
    pub fn all_random(&self) -> Vec<String> {
        self.0.iter().map(|p| p.random.clone()).collect()
    }

    /// The first pair whose plaintext is `plain`
    pub fn find_plain(&self, plain: &str) -> Option<&TagPair> {
        self.0.iter().find(|p| p.plain() == Some(plain))
    }

    /// The pair stored under `random`
    pub fn find_random(&self, random: &str) -> Option<&TagPair> {
        self.0.iter().find(|p| p.random == random)
    }

    /// One pair for each plaintext tag, in query order.
    ///
    /// Every tag must be present: a label with no pair means no row can
    /// carry it, so the whole lookup fails with `TagPairNotFound`.
    pub fn with_all_plain_tags<S: AsRef<str>>(&self, plaintags: &[S]) -> Result<TagPairs> {
        let mut seen = HashSet::new();
        let mut matches = Vec::with_capacity(plaintags.len());
        for tag in plaintags {
            let tag = tag.as_ref();
            if !seen.insert(tag) {
                continue;
            }
            let pair = self.find_plain(tag).ok_or(BackendError::TagPairNotFound)?;
            matches.push(pair.clone());
        }
        Ok(TagPairs(matches))
    }

    /// Every pair whose random tag is in `randtags`. Unknown tags are skipped.
    pub fn with_random_tags<S: AsRef<str>>(&self, randtags: &[S]) -> Result<TagPairs> {
        let wanted: HashSet<&str> = randtags.iter().map(|t| t.as_ref()).collect();
        let matches: Vec<TagPair> = self
            .0
            .iter()
            .filter(|p| wanted.contains(p.random.as_str()))
            .cloned()
            .collect();
        if matches.is_empty() {
            return Err(BackendError::TagPairNotFound);
        }
        Ok(TagPairs(matches))
    }
}

impl std::ops::Deref for TagPairs {
    type Target = [TagPair];

    fn deref(&self) -> &[TagPair] {
        &self.0
    }
}

impl From<Vec<TagPair>> for TagPairs {
    fn from(pairs: Vec<TagPair>) -> Self {
        Self(pairs)
    }
}

impl FromIterator<TagPair> for TagPairs {
    fn from_iter<I: IntoIterator<Item = TagPair>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for TagPairs {
    type Item = TagPair;
    type IntoIter = std::vec::IntoIter<TagPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TagPairs {
    type Item = &'a TagPair;
    type IntoIter = std::slice::Iter<'a, TagPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
