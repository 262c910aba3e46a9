//! Text/binary body classification

/// Bytes inspected from the start of the body
pub const SAMPLE_SIZE: usize = 1000;

/// Non-printable fraction tolerated for text-family content types
pub const TEXT_FAMILY_THRESHOLD: f64 = 0.50;

/// Non-printable fraction tolerated for everything else
pub const DEFAULT_THRESHOLD: f64 = 0.25;

/// MIME essence assumed when no content type was declared
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Presentation class of a captured body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Safe to show as text
    Text,
    /// Mostly control bytes
    Binary,
}

impl BodyKind {
    /// Whether the body is binary
    #[must_use]
    pub fn is_binary(self) -> bool {
        self == Self::Binary
    }
}

/// Lowercased MIME type without parameters, `text/plain` when absent or blank
#[must_use]
pub fn mime_essence(content_type: Option<&str>) -> String {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .unwrap_or_default();

    if essence.is_empty() {
        DEFAULT_CONTENT_TYPE.to_string()
    } else {
        essence.to_ascii_lowercase()
    }
}

/// Whether a MIME essence gets the lenient threshold
///
/// Plain text is deliberately excluded: it is also what an undeclared body
/// defaults to, so it carries no evidence of being text.
#[must_use]
pub fn is_text_family(mime: &str) -> bool {
    if mime == DEFAULT_CONTENT_TYPE {
        return false;
    }

    mime.starts_with("text/")
        || ["json", "xml", "html", "form-urlencoded"]
            .iter()
            .any(|marker| mime.contains(marker))
}

/// Control byte other than tab, LF, CR and ESC
#[must_use]
pub fn is_non_printable(byte: u8) -> bool {
    byte < 32 && !matches!(byte, 9 | 10 | 13 | 27)
}

/// Classify a body given the MIME essence of its declared content type
#[must_use]
pub fn classify(body: &[u8], mime: &str) -> BodyKind {
    let sample = &body[..body.len().min(SAMPLE_SIZE)];
    if sample.is_empty() {
        return BodyKind::Text;
    }

    let non_printable = sample.iter().filter(|b| is_non_printable(**b)).count();
    let threshold = if is_text_family(mime) {
        TEXT_FAMILY_THRESHOLD
    } else {
        DEFAULT_THRESHOLD
    };

    if non_printable as f64 / sample.len() as f64 > threshold {
        BodyKind::Binary
    } else {
        BodyKind::Text
    }
}
