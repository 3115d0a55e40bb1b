use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

const COMBINING_DOT_ABOVE: char = '\u{0307}';

/// Trimmed, whitespace-collapsed form in the original case. This is what
/// menus and feature properties show.
pub fn display(raw: &str) -> String {
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

/// Canonical join key for a district name.
///
/// `İ` (and the combining dot left behind by lower-casing it) fold to a plain
/// `I`, so Turkish-cased sources agree with ASCII-cased ones.
pub fn normalize(raw: &str) -> String {
    display(raw)
        .to_uppercase()
        .chars()
        .filter(|c| *c != COMBINING_DOT_ABOVE)
        .map(|c| if c == 'İ' { 'I' } else { c })
        .collect()
}

/// A district name in both canonical and display form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DistrictName {
    pub canonical: String,
    pub display: String,
}

impl DistrictName {
    /// `None` when the name is blank.
    pub fn parse(raw: &str) -> Option<Self> {
        let canonical = normalize(raw);
        if canonical.is_empty() {
            return None;
        }
        Some(Self {
            canonical,
            display: display(raw),
        })
    }
}
