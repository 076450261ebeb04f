//! Conditional GET matching for `If-None-Match`.

/// Returns `true` when `if_none_match` selects `entity_tag`.
///
/// Accepted header forms:
///
/// ```text
/// If-None-Match: *
/// If-None-Match: abc
/// If-None-Match: "abc"
/// If-None-Match: W/"abc"
/// If-None-Match: "abc", "def"
/// ```
///
/// A bare tag only matches the whole header. Inside a list the tag has to be
/// quoted, so `abc` never matches `abcxyz`.
pub fn matches(entity_tag: Option<&str>, if_none_match: Option<&str>) -> bool {
    let (Some(tag), Some(header)) = (entity_tag, if_none_match) else {
        return false;
    };
    header == "*" || header == tag || header.contains(&format!("\"{tag}\""))
}
