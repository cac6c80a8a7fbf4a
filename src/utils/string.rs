//! String utilities
//!
//! Helpers for rendering API keys without leaking them.

/// Number of trailing characters kept by [`mask_key`]
pub const MASK_SUFFIX_CHARS: usize = 5;

/// Return the last `count` characters of `s`, respecting UTF-8 boundaries
pub fn last_chars(s: &str, count: usize) -> &str {
    let total = s.chars().count();
    if total <= count {
        return s;
    }
    match s.char_indices().nth(total - count) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Return the first `count` characters of `s`, respecting UTF-8 boundaries
pub fn first_chars(s: &str, count: usize) -> &str {
    match s.char_indices().nth(count) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Display-safe form of an API key: `...` followed by its last five characters
///
/// Keys of five characters or fewer are returned unchanged.
///
/// # Example
/// ```
/// use gemini_key_proxy::utils::mask_key;
///
/// assert_eq!(mask_key("AIzaSyExample12345"), "...12345");
/// assert_eq!(mask_key("abc"), "abc");
/// ```
pub fn mask_key(key: &str) -> String {
    if key.chars().count() > MASK_SUFFIX_CHARS {
        format!("...{}", last_chars(key, MASK_SUFFIX_CHARS))
    } else {
        key.to_string()
    }
}
