//! Key normalization shared by every comparison of receipt ids and usernames

/// Canonical comparison key: surrounding whitespace removed, lowercased
pub fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Case-insensitive equality under [`normalize_key`]
pub fn keys_match(a: &str, b: &str) -> bool {
    normalize_key(a) == normalize_key(b)
}

/// Case-insensitive substring test used by admin searches
pub fn contains_key(haystack: &str, needle: &str) -> bool {
    normalize_key(haystack).contains(&normalize_key(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_key("  UBA-0042 "), "uba-0042");
        assert!(keys_match("Alice", "alice "));
        assert!(!keys_match("alice", "alicia"));
        assert!(contains_key("alice@uni.edu", "UNI"));
    }
}
