use anyhow::anyhow;
use kuchiki::NodeRef;
use tracing::{debug, warn};

use crate::ir::{SourceUnit, TranslationUnit};
use crate::sentinels::contains_separator;
use crate::textutil::char_len;

use super::chunk::chunk_element;
use super::sanitize::LinkPolicy;
use super::serialize::Serializer;
use super::tags::{
    is_container_tag, is_hidden, is_interactive, is_skip_tag,
    is_structural_block_tag, is_translator_ui, is_unit_block_tag, tag_name, visible_text,
};

const MIN_TEXT_CHARS: usize = 2;
/// Smallest usable unit ceiling. Below it a single entity or short tag pair
/// cannot fit in one chunk.
pub const MIN_UNIT_CHARS: usize = 16;

/// Units extracted from one document, plus the elements they map back to.
#[derive(Clone, Debug, Default)]
pub struct Extraction {
    pub elements: Vec<NodeRef>,
    pub units: Vec<SourceUnit>,
}

impl Extraction {
    pub fn translation_units(&self) -> Vec<TranslationUnit> {
        self.units.iter().map(|u| u.unit.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Walk `<body>` and turn every safe leaf region into one or more units.
pub fn extract_units(
    document: &NodeRef,
    policy: &LinkPolicy,
    max_unit_chars: usize,
) -> anyhow::Result<Extraction> {
    let body = document
        .select_first("body")
        .map_err(|_| anyhow!("document has no body"))?;
    let elements = collect_unit_elements(body.as_node());
    let max_unit_chars = max_unit_chars.max(MIN_UNIT_CHARS);

    let mut out = Extraction::default();
    for element in elements {
        let html = extract_unit_html(&element, policy);
        if html.is_empty() {
            continue;
        }
        // The separator in page text would shift every later part of its batch.
        if contains_separator(&html) {
            warn!("skipping element whose text contains the unit separator");
            continue;
        }
        let element_index = out.elements.len();
        let chunks = if char_len(&html) > max_unit_chars {
            chunk_element(&element, policy, max_unit_chars)
        } else {
            vec![html]
        };
        if chunks.is_empty() {
            continue;
        }
        if chunks.len() > 1 {
            debug!(element_index, chunks = chunks.len(), "oversized unit split");
        }
        let total_chunks = chunks.len();
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let id = out.units.len();
            out.units.push(SourceUnit {
                unit: TranslationUnit::new(id, chunk),
                element_index,
                chunk_index,
                total_chunks,
            });
        }
        out.elements.push(element);
    }
    Ok(out)
}

pub fn extract_unit_html(element: &NodeRef, policy: &LinkPolicy) -> String {
    Serializer::for_element(element, policy).children(element)
}

/// Pre-order walk: an eligible element ends the descent, anything else recurses.
pub fn collect_unit_elements(root: &NodeRef) -> Vec<NodeRef> {
    let mut out = Vec::new();
    walk(root, &mut out);
    out
}

fn walk(node: &NodeRef, out: &mut Vec<NodeRef>) {
    for child in node.children() {
        let Some(el) = child.as_element() else {
            continue;
        };
        if is_skip_tag(tag_name(el)) || is_hidden(el) || is_translator_ui(el) {
            continue;
        }
        if is_safe_translation_unit(&child) {
            out.push(child.clone());
            continue;
        }
        walk(&child, out);
    }
}

pub fn is_safe_translation_unit(node: &NodeRef) -> bool {
    let Some(el) = node.as_element() else {
        return false;
    };
    let tag = tag_name(el);
    if !is_unit_block_tag(tag) && !is_container_tag(tag) {
        return false;
    }
    if is_hidden(el) || is_translator_ui(el) {
        return false;
    }
    if node
        .ancestors()
        .any(|a| a.as_element().is_some_and(is_translator_ui))
    {
        return false;
    }
    if is_interactive(el) {
        return false;
    }
    if visible_text(node).trim().chars().count() < MIN_TEXT_CHARS {
        return false;
    }
    for d in node.descendants() {
        let Some(del) = d.as_element() else {
            continue;
        };
        let dtag = tag_name(del);
        if is_interactive(del) || is_structural_block_tag(dtag) {
            return false;
        }
        if is_container_tag(dtag) && !visible_text(&d).trim().is_empty() {
            return false;
        }
    }
    true
}
