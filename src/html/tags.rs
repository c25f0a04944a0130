use kuchiki::{ElementData, NodeRef};

/// Attribute marking nodes that belong to the translator itself (error markers).
pub const UI_ATTR: &str = "data-page-translator-ui";

const UNIT_BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "td", "th", "dt", "dd", "blockquote",
    "caption", "figcaption", "summary", "label", "legend",
];

const CONTAINER_TAGS: &[&str] = &[
    "div", "section", "article", "main", "aside", "header", "footer", "nav", "figure",
    "details",
];

// Block-level structure that disqualifies an ancestor from being a leaf unit.
const STRUCTURAL_BLOCK_TAGS: &[&str] = &[
    "ul", "ol", "dl", "menu", "table", "thead", "tbody", "tfoot", "tr", "hr", "address",
    "fieldset", "form", "hgroup", "pre",
];

const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "canvas", "svg", "math", "object",
    "embed", "pre", "textarea", "head",
];

const EMBEDDED_TAGS: &[&str] = &[
    "img", "picture", "svg", "video", "audio", "canvas", "iframe", "object", "embed", "math",
];

// Dropped from unit markup but put back untouched when the element is rewritten.
const OPAQUE_TAGS: &[&str] = &["script", "style", "noscript", "template"];

const INTERACTIVE_TAGS: &[&str] = &["input", "textarea", "select", "button", "option"];

const INTERACTIVE_ROLES: &[&str] = &[
    "button", "checkbox", "combobox", "grid", "listbox", "menu", "menubar", "menuitem",
    "menuitemcheckbox", "menuitemradio", "option", "radio", "scrollbar", "searchbox",
    "slider", "spinbutton", "switch", "tab", "tablist", "textbox", "tree", "treeitem",
];

const INLINE_TAGS: &[&str] = &[
    "a", "b", "strong", "i", "em", "u", "s", "del", "ins", "mark", "small", "sub", "sup",
    "code", "kbd", "abbr", "cite", "q", "time", "br",
];

pub const ALLOWED_ATTRS: &[&str] = &["href", "title", "lang", "dir", "datetime", "cite"];

pub fn tag_name(el: &ElementData) -> &str {
    &el.name.local
}

pub fn is_unit_block_tag(tag: &str) -> bool {
    UNIT_BLOCK_TAGS.contains(&tag)
}

pub fn is_container_tag(tag: &str) -> bool {
    CONTAINER_TAGS.contains(&tag)
}

pub fn is_structural_block_tag(tag: &str) -> bool {
    STRUCTURAL_BLOCK_TAGS.contains(&tag) || UNIT_BLOCK_TAGS.contains(&tag)
}

pub fn is_skip_tag(tag: &str) -> bool {
    SKIP_TAGS.contains(&tag)
}

pub fn is_embedded_tag(tag: &str) -> bool {
    EMBEDDED_TAGS.contains(&tag)
}

/// Nodes a unit carries as opaque placeholders: embedded media, script-like
/// tags and hidden subtrees.
pub fn is_preserved_element(el: &ElementData) -> bool {
    let tag = tag_name(el);
    is_embedded_tag(tag) || OPAQUE_TAGS.contains(&tag) || is_hidden(el)
}

pub fn is_inline_tag(tag: &str) -> bool {
    INLINE_TAGS.contains(&tag)
}

pub fn is_void_tag(tag: &str) -> bool {
    tag == "br"
}

pub fn is_allowed_attr(name: &str) -> bool {
    ALLOWED_ATTRS.contains(&name)
}

pub fn is_hidden(el: &ElementData) -> bool {
    let attrs = el.attributes.borrow();
    if attrs.contains("hidden") {
        return true;
    }
    if attrs
        .get("aria-hidden")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    {
        return true;
    }
    match attrs.get("style") {
        Some(style) => {
            let compact: String = style
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase();
            compact.contains("display:none") || compact.contains("visibility:hidden")
        }
        None => false,
    }
}

pub fn is_translator_ui(el: &ElementData) -> bool {
    el.attributes.borrow().contains(UI_ATTR)
}

pub fn is_interactive(el: &ElementData) -> bool {
    if INTERACTIVE_TAGS.contains(&tag_name(el)) {
        return true;
    }
    let attrs = el.attributes.borrow();
    if let Some(v) = attrs.get("contenteditable") {
        if !v.trim().eq_ignore_ascii_case("false") {
            return true;
        }
    }
    match attrs.get("role") {
        Some(role) => role
            .split_whitespace()
            .any(|r| INTERACTIVE_ROLES.contains(&r.to_ascii_lowercase().as_str())),
        None => false,
    }
}

/// Text a reader would see: skip-tag subtrees and hidden elements contribute nothing.
pub fn visible_text(node: &NodeRef) -> String {
    let mut out = String::new();
    push_visible_text(node, &mut out);
    out
}

fn push_visible_text(node: &NodeRef, out: &mut String) {
    for child in node.children() {
        if let Some(text) = child.as_text() {
            out.push_str(&text.borrow());
        } else if let Some(el) = child.as_element() {
            if is_skip_tag(tag_name(el)) || is_hidden(el) {
                continue;
            }
            push_visible_text(&child, out);
        }
    }
}
