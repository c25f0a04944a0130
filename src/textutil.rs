use once_cell::sync::Lazy;
use regex::Regex;

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));

/// Collapse every whitespace run into one ASCII space. Does not trim.
pub fn collapse_whitespace(text: &str) -> String {
    WS_RE.replace_all(text, " ").into_owned()
}

pub fn normalize_whitespace(text: &str) -> String {
    collapse_whitespace(text).trim().to_string()
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Crude tag stripper used for the plain-text fallback; entities are decoded
/// later by the HTML parser when the text is inserted.
pub fn strip_tags(html: &str) -> String {
    normalize_whitespace(&TAG_RE.replace_all(html, " "))
}

pub fn decode_basic_entities(text: &str) -> String {
    text.replace("&nbsp;", "\u{a0}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Split text after sentence-ending punctuation, keeping the trailing
/// whitespace with the sentence it follows. Concatenating the result yields
/// the input.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut state = Boundary::None;
    for ch in text.chars() {
        if state == Boundary::TerminalSpace && !ch.is_whitespace() {
            out.push(std::mem::take(&mut cur));
            state = Boundary::None;
        }
        cur.push(ch);
        // CJK terminators need no following space.
        if matches!(ch, '。' | '！' | '？') {
            out.push(std::mem::take(&mut cur));
            state = Boundary::None;
        } else if matches!(ch, '.' | '!' | '?' | '…') {
            state = Boundary::Terminal;
        } else if ch.is_whitespace() {
            if state != Boundary::None {
                state = Boundary::TerminalSpace;
            }
        } else if state == Boundary::Terminal && matches!(ch, '"' | '\'' | '”' | '’' | ')') {
            // closing quote right after the stop still ends the sentence
        } else {
            state = Boundary::None;
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    merge_trailing_whitespace(out)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Boundary {
    None,
    Terminal,
    TerminalSpace,
}

fn merge_trailing_whitespace(parts: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(parts.len());
    for p in parts {
        match out.last_mut() {
            Some(last) if p.trim().is_empty() => last.push_str(&p),
            _ => out.push(p),
        }
    }
    out
}

/// Split on whitespace boundaries, keeping each word's trailing whitespace.
pub fn split_words(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_ws = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_ws = true;
        } else if in_ws {
            out.push(std::mem::take(&mut cur));
            in_ws = false;
        }
        cur.push(ch);
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    if char_len(text) <= max {
        return text.to_string();
    }
    let mut s: String = text.chars().take(max).collect();
    s.push('…');
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_concatenate_back_to_input() {
        let text = "First one. Second one!  Third? tail without stop";
        let parts = split_sentences(text);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts.concat(), text);
        assert_eq!(parts[0], "First one. ");
    }

    #[test]
    fn decimal_points_do_not_split() {
        let parts = split_sentences("Version 2.5 is out. Next");
        assert_eq!(parts, vec!["Version 2.5 is out. ", "Next"]);
    }

    #[test]
    fn cjk_sentences_split_without_spaces() {
        let parts = split_sentences("你好。世界！");
        assert_eq!(parts, vec!["你好。", "世界！"]);
    }

    #[test]
    fn words_keep_trailing_whitespace() {
        let parts = split_words("a bb  ccc");
        assert_eq!(parts, vec!["a ", "bb  ", "ccc"]);
    }

    #[test]
    fn escape_and_strip() {
        assert_eq!(escape_text("a<b & c"), "a&lt;b &amp; c");
        assert_eq!(escape_attr("say \"hi\""), "say &quot;hi&quot;");
        assert_eq!(strip_tags("<b>Hello</b>  <i>world</i>"), "Hello world");
    }
}
