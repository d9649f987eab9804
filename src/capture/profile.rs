use serde::{Deserialize, Serialize};

/// An expected tag presentation: display label plus the fixture file stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagProfile {
    pub label: String,
    pub slug: String,
    /// ISO 15693 (NFC-V) tag; skipped on readers without NFC-V support
    #[serde(default)]
    pub iso15693: bool,
}

impl TagProfile {
    pub fn new(label: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            slug: slug.into(),
            iso15693: false,
        }
    }

    pub fn iso15693(mut self) -> Self {
        self.iso15693 = true;
        self
    }

    /// Parse `LABEL=slug`. A bare label derives its slug.
    pub fn parse(value: &str) -> Option<Self> {
        let (label, slug) = match value.split_once('=') {
            Some((label, slug)) => (label.trim(), slug.trim().to_string()),
            None => (value.trim(), slugify(value)),
        };
        if label.is_empty() || slug.is_empty() || !is_safe_slug(&slug) {
            return None;
        }
        Some(Self::new(label, slug))
    }

    /// Slug usable as a file stem
    pub fn has_safe_slug(&self) -> bool {
        !self.slug.is_empty() && is_safe_slug(&self.slug)
    }

    /// Loose check that the agent's inferred type matches this profile.
    ///
    /// Either label may contain the other, so "MIFARE Classic 1K" accepts
    /// "MIFARE Classic" and "NTAG215" accepts "NTAG215 (NFC Forum Type 2)".
    pub fn matches_detected(&self, detected_type: &str) -> bool {
        let detected = detected_type.trim().to_uppercase();
        let expected = self.label.to_uppercase().replace(" 1K", "");
        if detected.is_empty() {
            return false;
        }
        expected.contains(&detected) || detected.contains(&expected)
    }
}

/// Tags captured by default, in presentation order
pub fn default_profiles() -> Vec<TagProfile> {
    vec![
        TagProfile::new("NTAG213", "ntag213"),
        TagProfile::new("NTAG215", "ntag215"),
        TagProfile::new("NTAG216", "ntag216"),
        TagProfile::new("ICode Slix2", "icode_slix2").iso15693(),
        TagProfile::new("MIFARE Classic 1K", "mifare_classic"),
        TagProfile::new("MIFARE Ultralight", "mifare_ultralight"),
    ]
}

fn slugify(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn is_safe_slug(slug: &str) -> bool {
    slug.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
