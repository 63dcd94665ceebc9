//! Random tag tokens
//!
//! A random tag is the only form of a label a backend ever stores. It is
//! drawn from the OS RNG and has no relationship to the label it stands for.

use rand::{Rng, rngs::OsRng};

/// Alphabet random tags are drawn from
pub const RANDOM_TAG_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a random tag
pub const RANDOM_TAG_LENGTH: usize = 9;

/// A random string of `length` characters from `alphabet`.
///
/// Returns an empty string when `alphabet` is empty.
pub fn random_string(alphabet: &str, length: usize) -> String {
    let chars: Vec<char> = alphabet.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    (0..length)
        .map(|_| chars[OsRng.gen_range(0..chars.len())])
        .collect()
}

/// A fresh random tag
pub fn random_tag() -> String {
    random_string(RANDOM_TAG_ALPHABET, RANDOM_TAG_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_random_tag_shape() {
        let tag = random_tag();
        assert_eq!(tag.len(), RANDOM_TAG_LENGTH);
        assert!(tag.chars().all(|c| RANDOM_TAG_ALPHABET.contains(c)));
    }

    #[test]
    fn test_random_tags_differ() {
        let tags: std::collections::HashSet<String> = (0..64).map(|_| random_tag()).collect();
        assert_eq!(tags.len(), 64);
    }

    #[rstest]
    #[case("ab", 0)]
    #[case("x", 5)]
    #[case("0123456789", 32)]
    fn test_random_string_length(#[case] alphabet: &str, #[case] length: usize) {
        let s = random_string(alphabet, length);
        assert_eq!(s.chars().count(), length);
        assert!(s.chars().all(|c| alphabet.contains(c)));
    }

    #[test]
    fn test_empty_alphabet() {
        assert_eq!(random_string("", 9), "");
    }
}
