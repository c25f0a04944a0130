use once_cell::sync::Lazy;
use regex::Regex;

/// Token placed between units in a batch prompt and expected back between
/// translations.
pub const UNIT_SEPARATOR: &str = "[[[PTX_UNIT_BREAK]]]";

// Models sometimes add spaces inside the brackets or change case; accept those.
static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[\[\[\s*PTX_UNIT_BREAK\s*\]\]\]").expect("separator regex")
});

pub fn join_units<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let sep = format!("\n{UNIT_SEPARATOR}\n");
    parts.into_iter().collect::<Vec<_>>().join(&sep)
}

/// Split a model response into trimmed parts. A dangling separator at the very
/// end does not count as an extra part.
pub fn split_units(text: &str) -> Vec<String> {
    let mut parts: Vec<String> = SEPARATOR_RE
        .split(text)
        .map(|p| p.trim().to_string())
        .collect();
    if parts.len() > 1 && parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
    parts
}

pub fn contains_separator(text: &str) -> bool {
    SEPARATOR_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_split_keeps_order() {
        let joined = join_units(["<b>a</b>", "b", "c"]);
        assert_eq!(split_units(&joined), vec!["<b>a</b>", "b", "c"]);
    }

    #[test]
    fn tolerant_separator_matching() {
        let parts = split_units("one\n[[[ ptx_unit_break ]]]\ntwo\n[[[PTX_UNIT_BREAK]]]\n");
        assert_eq!(parts, vec!["one", "two"]);
    }

    #[test]
    fn empty_middle_part_is_kept() {
        let parts = split_units("one\n[[[PTX_UNIT_BREAK]]]\n \n[[[PTX_UNIT_BREAK]]]\nthree");
        assert_eq!(parts, vec!["one", "", "three"]);
    }

    #[test]
    fn no_separator_is_one_part() {
        assert_eq!(split_units("  just text "), vec!["just text"]);
        assert!(!contains_separator("just text"));
    }
}
