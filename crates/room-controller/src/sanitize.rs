//! Display name normalization.
//!
//! Room names are derived from member display names. Names are decomposed
//! with Unicode compatibility decomposition (NFKD) so accented letters keep
//! their base letter, then every character outside `[A-Za-z0-9-_]` is dropped
//! and the result is truncated to [`MAX_ROOM_NAME_LEN`] characters.

use unicode_normalization::UnicodeNormalization;

/// Maximum length of a sanitized room name.
pub const MAX_ROOM_NAME_LEN: usize = 32;

/// Normalize a raw display name into a room name.
///
/// Total and pure. An input with no usable characters yields an empty string;
/// the caller decides on a fallback name.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    raw.nfkd()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_ROOM_NAME_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_punctuation_and_folds_accents() {
        assert_eq!(sanitize("Jöhn_Doe-99!"), "John_Doe-99");
    }

    #[test]
    fn test_truncates_to_32() {
        let long = "a".repeat(50);
        assert_eq!(sanitize(&long), "a".repeat(32));
    }

    #[test]
    fn test_truncation_counts_kept_characters_only() {
        let raw = format!("!!!{}", "b".repeat(40));
        assert_eq!(sanitize(&raw).len(), MAX_ROOM_NAME_LEN);
    }

    #[test]
    fn test_empty_and_unusable_input() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("🎧 ✨"), "");
    }

    #[test]
    fn test_spaces_are_removed() {
        assert_eq!(sanitize("Big Room 7"), "BigRoom7");
    }
}
