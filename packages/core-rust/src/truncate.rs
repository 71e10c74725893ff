//! Byte-bounded string truncation for message attributes.
//!
//! Transport attribute values have a hard byte ceiling
//! ([`MAX_ATTRIBUTE_LENGTH`](crate::MAX_ATTRIBUTE_LENGTH)). Truncating a Rust
//! `&str` at an arbitrary byte offset would panic when the offset lands inside
//! a multi-byte character, so the cut point is moved back to the nearest
//! character boundary instead.

/// Returns the longest prefix of `value` that fits in `max_bytes` bytes
/// without splitting a UTF-8 character.
///
/// Strings already within budget are returned unchanged. A budget of zero, or
/// one smaller than the first character, yields an empty string.
///
/// # Examples
///
/// ```
/// use courier_core::truncate::truncate_to_bytes;
///
/// assert_eq!(truncate_to_bytes("hello", 3), "hel");
/// assert_eq!(truncate_to_bytes("日本語", 4), "日"); // 3 bytes per character
/// assert_eq!(truncate_to_bytes("日本語", 2), "");
/// assert_eq!(truncate_to_bytes("short", 1024), "short");
/// ```
#[must_use]
pub fn truncate_to_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }

    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
