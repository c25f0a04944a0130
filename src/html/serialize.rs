use kuchiki::{ElementData, NodeRef};

use crate::textutil::{collapse_whitespace, escape_attr, escape_text, normalize_whitespace};

use super::sanitize::LinkPolicy;
use super::tags::{
    is_allowed_attr, is_inline_tag, is_preserved_element, is_skip_tag, is_void_tag, tag_name,
};

/// Marks a placeholder standing in for an untranslatable node of the source element.
pub const PLACEHOLDER_ATTR: &str = "data-ptx-keep";

/// Writes markup in the restricted vocabulary.
///
/// For a source element, preserved descendants (embedded media, hidden
/// subtrees, scripts) become `<img data-ptx-keep="N">` placeholders numbered in
/// document order, so the applier can put the original nodes back. For model
/// output there are no originals and only well-formed placeholders survive.
pub struct Serializer<'a> {
    policy: &'a LinkPolicy,
    preserved: Vec<NodeRef>,
}

impl<'a> Serializer<'a> {
    pub fn for_element(element: &NodeRef, policy: &'a LinkPolicy) -> Self {
        Self {
            policy,
            preserved: preserved_nodes(element),
        }
    }

    pub fn for_fragment(policy: &'a LinkPolicy) -> Self {
        Self {
            policy,
            preserved: Vec::new(),
        }
    }

    pub fn policy(&self) -> &LinkPolicy {
        self.policy
    }

    /// Children of `node`, with whitespace collapsed and trimmed.
    pub fn children(&self, node: &NodeRef) -> String {
        let mut out = String::new();
        for child in node.children() {
            self.write(&child, &mut out);
        }
        normalize_whitespace(&out)
    }

    /// One node without trimming, so siblings can be concatenated.
    pub fn node(&self, node: &NodeRef) -> String {
        let mut out = String::new();
        self.write(node, &mut out);
        out
    }

    fn write(&self, node: &NodeRef, out: &mut String) {
        if let Some(text) = node.as_text() {
            out.push_str(&escape_text(&collapse_whitespace(&text.borrow())));
            return;
        }
        let Some(el) = node.as_element() else {
            return;
        };
        if is_preserved_element(el) {
            let index = self
                .preserved
                .iter()
                .position(|p| p == node)
                .or_else(|| placeholder_index(el));
            if let Some(i) = index {
                out.push_str(&placeholder(i));
            }
            return;
        }
        let tag = tag_name(el);
        if is_skip_tag(tag) {
            return;
        }
        if !is_inline_tag(tag) {
            for child in node.children() {
                self.write(&child, out);
            }
            return;
        }
        out.push_str(&open_tag(el, self.policy));
        if is_void_tag(tag) {
            return;
        }
        for child in node.children() {
            self.write(&child, out);
        }
        out.push_str(&close_tag(el));
    }
}

/// Top-most preserved descendants of `element`, in document order.
pub fn preserved_nodes(element: &NodeRef) -> Vec<NodeRef> {
    let mut out = Vec::new();
    collect_preserved(element, &mut out);
    out
}

fn collect_preserved(node: &NodeRef, out: &mut Vec<NodeRef>) {
    for child in node.children() {
        if let Some(el) = child.as_element() {
            if is_preserved_element(el) {
                out.push(child.clone());
                continue;
            }
            if is_skip_tag(tag_name(el)) {
                continue;
            }
        }
        collect_preserved(&child, out);
    }
}

pub fn placeholder(index: usize) -> String {
    format!(r#"<img {PLACEHOLDER_ATTR}="{index}">"#)
}

/// Index carried by a placeholder element, if `el` is one.
pub fn placeholder_index(el: &ElementData) -> Option<usize> {
    if tag_name(el) != "img" {
        return None;
    }
    el.attributes
        .borrow()
        .get(PLACEHOLDER_ATTR)
        .and_then(|v| v.trim().parse().ok())
}

/// Whether the element survives as markup (as opposed to being unwrapped).
pub fn is_kept_element(el: &ElementData) -> bool {
    is_inline_tag(tag_name(el))
}

pub fn open_tag(el: &ElementData, policy: &LinkPolicy) -> String {
    let tag = tag_name(el);
    let mut out = format!("<{tag}");
    let attrs = el.attributes.borrow();
    for (name, attr) in attrs.map.iter() {
        let key: &str = &name.local;
        if !is_allowed_attr(key) {
            continue;
        }
        let value = if key == "href" {
            match policy.sanitize_href(&attr.value) {
                Some(v) => v,
                None => continue,
            }
        } else {
            normalize_whitespace(&attr.value)
        };
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attr(&value));
        out.push('"');
    }
    out.push('>');
    out
}

pub fn close_tag(el: &ElementData) -> String {
    format!("</{}>", tag_name(el))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuchiki::traits::*;

    fn first(doc: &NodeRef, sel: &str) -> NodeRef {
        doc.select_first(sel).unwrap().as_node().clone()
    }

    fn unit_html(doc: &NodeRef, sel: &str) -> String {
        let policy = LinkPolicy::default();
        let el = first(doc, sel);
        Serializer::for_element(&el, &policy).children(&el)
    }

    #[test]
    fn keeps_vocabulary_and_unwraps_the_rest() {
        let doc = kuchiki::parse_html().one(
            r#"<p class="x">Hello <span style="color:red">big</span>
               <strong data-x="1" title="T">world</strong><br>next <a href="/a" target="_blank">go</a></p>"#,
        );
        assert_eq!(
            unit_html(&doc, "p"),
            r#"Hello big <strong title="T">world</strong><br>next <a href="/a">go</a>"#
        );
    }

    #[test]
    fn escapes_text_and_attributes() {
        let doc = kuchiki::parse_html().one(r#"<p><abbr title="a &quot;b&quot;">x &lt; y</abbr></p>"#);
        assert_eq!(unit_html(&doc, "p"), r#"<abbr title="a &quot;b&quot;">x &lt; y</abbr>"#);
    }

    #[test]
    fn hidden_scripts_and_media_become_placeholders() {
        let doc = kuchiki::parse_html().one(
            r#"<p>a<!-- note --><script>var x;</script> <span hidden>secret</span> b <img src="i.png" alt="i"> c</p>"#,
        );
        assert_eq!(
            unit_html(&doc, "p"),
            r#"a<img data-ptx-keep="0"> <img data-ptx-keep="1"> b <img data-ptx-keep="2"> c"#
        );
        let p = first(&doc, "p");
        let kept = preserved_nodes(&p);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[1].text_contents(), "secret");
    }

    #[test]
    fn fragment_mode_keeps_only_placeholders() {
        let doc = kuchiki::parse_html()
            .one(r#"<p>x <img data-ptx-keep="4" src="evil"> <img src="other.png"> <svg></svg>y</p>"#);
        let policy = LinkPolicy::default();
        let out = Serializer::for_fragment(&policy).children(&first(&doc, "p"));
        assert_eq!(out, r#"x <img data-ptx-keep="4"> y"#);
    }
}
