use kuchiki::NodeRef;

use crate::textutil::{
    char_len, collapse_whitespace, escape_text, normalize_whitespace, split_sentences, split_words,
};

use super::sanitize::LinkPolicy;
use super::serialize::{close_tag, is_kept_element, open_tag, Serializer};
use super::tags::{is_preserved_element, is_skip_tag, tag_name};

/// Split an element's content into child-aligned chunks of at most `max_chars`
/// characters each. Chunks come back in document order. A kept inline element
/// whose own tags do not fit is emitted whole rather than losing its markup.
pub fn chunk_element(node: &NodeRef, policy: &LinkPolicy, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let ser = Serializer::for_element(node, policy);
    chunk_nodes(&ser, node.children(), max_chars)
}

fn chunk_nodes(
    ser: &Serializer<'_>,
    children: impl Iterator<Item = NodeRef>,
    max_chars: usize,
) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut cur = String::new();
    for child in children {
        let html = ser.node(&child);
        if html.trim().is_empty() {
            cur.push_str(&html);
            continue;
        }
        if fits(&cur, &html, max_chars) {
            cur.push_str(&html);
            continue;
        }
        flush(&mut cur, &mut chunks);
        if char_len(&normalize_whitespace(&html)) <= max_chars {
            cur = html;
            continue;
        }
        chunks.extend(chunk_oversized(ser, &child, max_chars));
    }
    flush(&mut cur, &mut chunks);
    chunks
}

fn chunk_oversized(ser: &Serializer<'_>, node: &NodeRef, max_chars: usize) -> Vec<String> {
    if let Some(text) = node.as_text() {
        let text = text.borrow().clone();
        return chunk_text(&text, max_chars);
    }
    let Some(el) = node.as_element() else {
        return Vec::new();
    };
    if is_preserved_element(el) || is_skip_tag(tag_name(el)) {
        return whole(ser, node);
    }
    if !is_kept_element(el) {
        return chunk_nodes(ser, node.children(), max_chars);
    }
    let open = open_tag(el, ser.policy());
    let close = close_tag(el);
    let overhead = char_len(&open) + char_len(&close);
    if overhead >= max_chars {
        return whole(ser, node);
    }
    chunk_nodes(ser, node.children(), max_chars - overhead)
        .into_iter()
        .map(|inner| format!("{open}{inner}{close}"))
        .collect()
}

fn whole(ser: &Serializer<'_>, node: &NodeRef) -> Vec<String> {
    let html = normalize_whitespace(&ser.node(node));
    if html.is_empty() {
        Vec::new()
    } else {
        vec![html]
    }
}

/// Sentence packing first, then words, then a hard split for a single giant word.
fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let collapsed = collapse_whitespace(text);
    let mut chunks: Vec<String> = Vec::new();
    let mut cur = String::new();
    for sentence in split_sentences(&collapsed) {
        let esc = escape_text(&sentence);
        if fits(&cur, &esc, max_chars) {
            cur.push_str(&esc);
            continue;
        }
        flush(&mut cur, &mut chunks);
        if char_len(esc.trim()) <= max_chars {
            cur = esc;
            continue;
        }
        for word in split_words(&sentence) {
            let esc = escape_text(&word);
            if fits(&cur, &esc, max_chars) {
                cur.push_str(&esc);
                continue;
            }
            flush(&mut cur, &mut chunks);
            if char_len(esc.trim()) <= max_chars {
                cur = esc;
                continue;
            }
            for ch in word.chars() {
                let esc = escape_text(ch.encode_utf8(&mut [0u8; 4]));
                if !fits(&cur, &esc, max_chars) {
                    flush(&mut cur, &mut chunks);
                }
                cur.push_str(&esc);
            }
        }
    }
    flush(&mut cur, &mut chunks);
    chunks
}

fn fits(cur: &str, add: &str, max_chars: usize) -> bool {
    let mut joined = String::with_capacity(cur.len() + add.len());
    joined.push_str(cur);
    joined.push_str(add);
    char_len(&normalize_whitespace(&joined)) <= max_chars
}

fn flush(cur: &mut String, chunks: &mut Vec<String>) {
    let s = normalize_whitespace(cur);
    if !s.is_empty() {
        chunks.push(s);
    }
    cur.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::textutil::strip_tags;
    use kuchiki::traits::*;

    fn para(html: &str) -> NodeRef {
        let doc = kuchiki::parse_html().one(html);
        doc.select_first("p").unwrap().as_node().clone()
    }

    #[test]
    fn chunks_rejoin_to_original() {
        let p = para(
            "<p>Alpha sentence one. Beta sentence two is longer. <em>Gamma</em> closes here. \
             <a href=\"https://x.test/\">Delta link text</a> and a tail. Final words!</p>",
        );
        let policy = LinkPolicy::default();
        let whole = Serializer::for_element(&p, &policy).children(&p);
        let chunks = chunk_element(&p, &policy, 60);
        assert_eq!(chunks.len(), 4);
        for c in &chunks {
            assert!(char_len(c) <= 60, "chunk too long: {c}");
        }
        assert_eq!(normalize_whitespace(&chunks.join(" ")), whole);
    }

    #[test]
    fn giant_word_is_hard_split() {
        let word = "x".repeat(25);
        let p = para(&format!("<p>{word}</p>"));
        let chunks = chunk_element(&p, &LinkPolicy::default(), 10);
        assert_eq!(chunks, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn oversized_kept_element_is_wrapped_per_chunk() {
        let inner = "word ".repeat(20);
        let p = para(&format!("<p><b>{inner}</b></p>"));
        let chunks = chunk_element(&p, &LinkPolicy::default(), 40);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.starts_with("<b>") && c.ends_with("</b>"), "{c}");
            assert!(char_len(c) <= 40);
        }
    }

    #[test]
    fn unwrapped_container_recurses_into_children() {
        let p = para("<p><span>one two three. four five six.</span><span> seven eight nine.</span></p>");
        let chunks = chunk_element(&p, &LinkPolicy::default(), 20);
        assert_eq!(
            normalize_whitespace(&chunks.join(" ")),
            "one two three. four five six. seven eight nine."
        );
        assert!(chunks.iter().all(|c| char_len(c) <= 20));
    }

    #[test]
    fn link_with_long_href_keeps_its_markup_in_every_chunk() {
        let href = format!("https://example.com/{}", "a".repeat(60));
        let p = para(&format!("<p><a href=\"{href}\">{}</a></p>", "word ".repeat(30)));
        let policy = LinkPolicy::default();
        let whole = Serializer::for_element(&p, &policy).children(&p);
        let chunks = chunk_element(&p, &policy, 100);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.starts_with(&format!("<a href=\"{href}\">")), "{c}");
            assert!(c.ends_with("</a>"), "{c}");
            assert!(char_len(c) <= 100, "{c}");
        }
        assert_eq!(
            normalize_whitespace(&strip_tags(&chunks.join(" "))),
            normalize_whitespace(&strip_tags(&whole))
        );
    }

    #[test]
    fn tags_longer_than_the_ceiling_stay_in_one_chunk() {
        let href = format!("https://example.com/{}", "b".repeat(80));
        let p = para(&format!("<p><a href=\"{href}\">some link words here</a> tail text</p>"));
        let chunks = chunk_element(&p, &LinkPolicy::default(), 50);
        assert_eq!(
            chunks,
            vec![format!("<a href=\"{href}\">some link words here</a>"), "tail text".to_string()]
        );
    }

    #[test]
    fn placeholders_survive_chunking_in_order() {
        let p = para("<p>First part here. <img src=\"a.png\"> Second part follows. <span hidden>x</span> End.</p>");
        let chunks = chunk_element(&p, &LinkPolicy::default(), 30);
        let joined = chunks.join(" ");
        let a = joined.find(r#"<img data-ptx-keep="0">"#).unwrap();
        let b = joined.find(r#"<img data-ptx-keep="1">"#).unwrap();
        assert!(a < b);
        assert!(chunks.iter().all(|c| char_len(c) <= 30));
    }
}
