//! Short, filesystem-safe reader identifiers.

/// Known model markers, matched against the upper-cased display name
const READER_MARKERS: &[(&str, &str)] = &[
    ("1552", "acr1552u"),
    ("122U", "acr122u"),
    ("1252", "acr1252u"),
];

/// Readers that cannot talk ISO 15693 (ICode) tags
const NO_ISO15693_MARKERS: &[&str] = &["122U", "1252"];

const MAX_SLUG_LEN: usize = 20;
const FALLBACK_ID: &str = "unknown";

/// Derive a stable short id from a reader's display name.
///
/// Known models map to fixed ids; anything else becomes a lower-cased slug
/// capped at 20 characters. Never returns an empty string.
pub fn derive_reader_id(display_name: &str) -> String {
    let upper = display_name.to_uppercase();
    if let Some((_, id)) = READER_MARKERS
        .iter()
        .find(|(marker, _)| upper.contains(marker))
    {
        return (*id).to_string();
    }

    let slug: String = display_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SLUG_LEN)
        .collect();

    if slug.chars().all(|c| c == '_') {
        FALLBACK_ID.to_string()
    } else {
        slug
    }
}

pub fn supports_iso15693(display_name: &str) -> bool {
    let upper = display_name.to_uppercase();
    !NO_ISO15693_MARKERS
        .iter()
        .any(|marker| upper.contains(marker))
}
