use lazy_static::lazy_static;
use regex::Regex;

pub(super) const LINE_COMMENT: &str = r"--[^\n]*";
pub(super) const BLOCK_COMMENT: &str = r"(?s:/\*.*?\*/)";
pub(super) const STRING_LITERAL: &str = r"'(?:[^']|'')*'";
pub(super) const QUOTED_IDENTIFIER: &str = r#""(?:[^"]|"")*""#;
pub(super) const BEGIN_END_BLOCK: &str = r"(?is:\bBEGIN\b.*\bEND\b)";
pub(super) const NAMED_PLACEHOLDER: &str = r":([A-Za-z_][A-Za-z0-9_]*)";

lazy_static! {
    pub(super) static ref DEFAULT_EXCLUSIONS: Vec<Regex> = [
        LINE_COMMENT,
        BLOCK_COMMENT,
        STRING_LITERAL,
        QUOTED_IDENTIFIER,
        BEGIN_END_BLOCK,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("built-in exclusion pattern"))
    .collect();
    pub(super) static ref DEFAULT_PLACEHOLDER: Regex =
        Regex::new(NAMED_PLACEHOLDER).expect("built-in placeholder pattern");
}

/// Join an ordered exclusion list into one alternation. The leftmost match wins;
/// at the same position, earlier patterns win.
pub(super) fn combine_exclusions(patterns: &[Regex]) -> Result<Option<Regex>, regex::Error> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let joined = patterns
        .iter()
        .map(|re| format!("(?:{})", re.as_str()))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&joined).map(Some)
}

/// Bare parameter name for a placeholder match: the first capture group when the
/// pattern has one, otherwise the match without its leading sigil.
pub(super) fn placeholder_name(caps: &regex::Captures<'_>) -> String {
    match caps.get(1) {
        Some(name) => name.as_str().to_owned(),
        None => {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            whole.chars().skip(1).collect()
        }
    }
}
