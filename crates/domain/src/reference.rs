//! Document references, field paths and the inline reference-link syntax.
//!
//! Owning documents are never held by pointer: controls and historical
//! records carry a [`DocumentRef`] that the host resolves lazily. Links
//! embedded in free text use the host's `@UUID[<ref>]{<label>}` syntax; a
//! frozen value is carried inside the label as `|snapshot:<n>` so it
//! survives any round-trip of the text itself.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

static LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@UUID\[([^\]]+)\]\{([^}]*)\}").expect("valid regex"));

const SNAPSHOT_MARKER: &str = "|snapshot:";

/// Field written when a rendered input carries no usable name.
pub const DEFAULT_FIELD: &str = "system.value";

/// Placeholder substituted by a control instance's key in templated paths.
pub const KEY_PLACEHOLDER: &str = "{key}";

// =============================================================================
// DocumentRef
// =============================================================================

/// Resolvable locator for an owning document (e.g. `Actor.a1b2c3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentRef(String);

impl DocumentRef {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("document reference cannot be empty"));
        }
        if trimmed.contains(['[', ']', '{', '}']) {
            return Err(DomainError::parse(format!(
                "invalid document reference: {trimmed}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare document id: the last dot-separated component.
    pub fn document_id(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentRef {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DocumentRef {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocumentRef> for String {
    fn from(value: DocumentRef) -> Self {
        value.0
    }
}

// =============================================================================
// FieldPath
// =============================================================================

/// Dotted path of a field on an owning document (e.g. `system.stress.value`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("field path cannot be empty"));
        }
        if trimmed.split('.').any(str::is_empty) {
            return Err(DomainError::parse(format!("malformed field path: {trimmed}")));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Derive the persisted field from a rendered input name.
    ///
    /// Inputs rendered outside a sheet carry a `-<document>-<instance>`
    /// suffix so several copies can coexist; that suffix is stripped.
    pub fn from_input_name(name: &str) -> Self {
        let stripped = strip_instance_suffix(name.trim());
        Self::new(stripped).unwrap_or_else(|_| Self(DEFAULT_FIELD.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn is_template(&self) -> bool {
        self.0.contains(KEY_PLACEHOLDER)
    }

    /// Substitute the instance key into a templated path.
    pub fn with_key(&self, key: &str) -> FieldPath {
        if !self.is_template() {
            return self.clone();
        }
        Self(self.0.replace(KEY_PLACEHOLDER, key))
    }
}

impl Default for FieldPath {
    fn default() -> Self {
        Self(DEFAULT_FIELD.to_string())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FieldPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FieldPath> for String {
    fn from(value: FieldPath) -> Self {
        value.0
    }
}

fn strip_instance_suffix(name: &str) -> &str {
    let mut parts = name.rsplitn(3, '-');
    let (Some(instance), Some(document), Some(rest)) = (parts.next(), parts.next(), parts.next())
    else {
        return name;
    };
    let is_token = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
    if is_token(instance) && is_token(document) && !rest.is_empty() {
        rest
    } else {
        name
    }
}

// =============================================================================
// Reference links
// =============================================================================

/// One `@UUID[...]{...}` occurrence inside a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceLink {
    pub target: DocumentRef,
    pub label: String,
    /// Value frozen into the link when the enclosing record was created.
    pub snapshot: Option<u32>,
    /// Byte range of the whole link in the source text.
    pub span: Range<usize>,
}

impl ReferenceLink {
    pub fn to_markup(&self) -> String {
        match self.snapshot {
            Some(value) => format!(
                "@UUID[{}]{{{}{}{}}}",
                self.target, self.label, SNAPSHOT_MARKER, value
            ),
            None => format!("@UUID[{}]{{{}}}", self.target, self.label),
        }
    }

    pub fn with_snapshot(&self, value: u32) -> Self {
        Self {
            snapshot: Some(value),
            ..self.clone()
        }
    }
}

/// Find every well-formed reference link in `text`, in order of appearance.
///
/// Links whose target is not a valid [`DocumentRef`] are skipped.
pub fn parse_links(text: &str) -> Vec<ReferenceLink> {
    LINK_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let target = DocumentRef::new(caps.get(1)?.as_str()).ok()?;
            let (label, snapshot) = split_label(caps.get(2)?.as_str());
            Some(ReferenceLink {
                target,
                label,
                snapshot,
                span: whole.range(),
            })
        })
        .collect()
}

fn split_label(raw: &str) -> (String, Option<u32>) {
    if let Some((label, tail)) = raw.rsplit_once(SNAPSHOT_MARKER) {
        if let Ok(value) = tail.parse::<u32>() {
            return (label.to_string(), Some(value));
        }
    }
    (raw.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_ref_rejects_empty_and_bracketed() {
        assert!(DocumentRef::new("  ").is_err());
        assert!(DocumentRef::new("Actor.a]b").is_err());
        let r = DocumentRef::new(" Actor.abc123 ").unwrap();
        assert_eq!(r.as_str(), "Actor.abc123");
        assert_eq!(r.document_id(), "abc123");
    }

    #[test]
    fn field_path_strips_render_instance_suffix() {
        assert_eq!(
            FieldPath::from_input_name("system.value-abc123-xyz789").as_str(),
            "system.value"
        );
        assert_eq!(
            FieldPath::from_input_name("system.healing_clock.value").as_str(),
            "system.healing_clock.value"
        );
        assert_eq!(FieldPath::from_input_name("").as_str(), DEFAULT_FIELD);
    }

    #[test]
    fn field_path_keeps_hyphenated_namespaces() {
        let path = FieldPath::from_input_name("flags.bitd-alternate-sheets.notes");
        assert_eq!(path.as_str(), "flags.bitd-alternate-sheets.notes");
    }

    #[test]
    fn field_path_rejects_empty_segments() {
        assert!(FieldPath::new("system..value").is_err());
        assert!(FieldPath::new("").is_err());
    }

    #[test]
    fn field_path_template_substitution() {
        let template =
            FieldPath::new("flags.bitd-alternate-sheets.multiAbilityProgress.{key}").unwrap();
        assert!(template.is_template());
        let path = template.with_key("Veteran");
        assert_eq!(
            path.as_str(),
            "flags.bitd-alternate-sheets.multiAbilityProgress.Veteran"
        );
        assert!(!path.is_template());
    }

    #[test]
    fn parses_plain_and_snapshot_links() {
        let text = "Tick @UUID[Actor.c1]{Alarm} and @UUID[Actor.c2]{Heat|snapshot:3}.";
        let links = parse_links(text);
        assert_eq!(links.len(), 2);

        assert_eq!(links[0].target.as_str(), "Actor.c1");
        assert_eq!(links[0].label, "Alarm");
        assert_eq!(links[0].snapshot, None);
        assert_eq!(&text[links[0].span.clone()], "@UUID[Actor.c1]{Alarm}");

        assert_eq!(links[1].label, "Heat");
        assert_eq!(links[1].snapshot, Some(3));
    }

    #[test]
    fn labels_with_pipes_keep_their_snapshot() {
        let link = &parse_links("@UUID[Actor.c1]{Heat | Wanted}")[0];
        let frozen = link.with_snapshot(4).to_markup();
        assert_eq!(frozen, "@UUID[Actor.c1]{Heat | Wanted|snapshot:4}");

        let reparsed = &parse_links(&frozen)[0];
        assert_eq!(reparsed.label, "Heat | Wanted");
        assert_eq!(reparsed.snapshot, Some(4));
    }

    #[test]
    fn malformed_snapshot_is_kept_as_label() {
        let links = parse_links("@UUID[Actor.c1]{Heat|snapshot:lots}");
        assert_eq!(links[0].label, "Heat|snapshot:lots");
        assert_eq!(links[0].snapshot, None);
    }

    #[test]
    fn link_markup_matches_source_syntax() {
        let links = parse_links("@UUID[Actor.c1]{Alarm}");
        assert_eq!(links[0].to_markup(), "@UUID[Actor.c1]{Alarm}");
        assert_eq!(
            links[0].with_snapshot(2).to_markup(),
            "@UUID[Actor.c1]{Alarm|snapshot:2}"
        );
    }
}
