use std::collections::{BTreeMap, HashMap};

use kuchiki::NodeRef;
use tracing::{debug, warn};

use crate::ir::BatchResultItem;
use crate::textutil::{decode_basic_entities, escape_attr, strip_tags};

use super::extract::Extraction;
use super::sanitize::{parse_fragment_nodes, sanitize_html, LinkPolicy};
use super::serialize::{placeholder_index, preserved_nodes, PLACEHOLDER_ATTR};
use super::tags::UI_ATTR;

pub const MISSING_CHUNKS: &str = "Missing translated chunk(s)";
pub const EMPTY_OUTPUT: &str = "Empty translation output";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Applied,
    Errored(String),
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryState::Pending)
    }
}

/// What a single recorded result did to its element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Unknown id, or the element already reached a terminal state.
    Ignored,
    /// Chunk stored; the element still waits for siblings.
    Recorded,
    Applied,
    Errored(String),
}

#[derive(Clone, Debug)]
struct ChunkResult {
    translated_html: String,
    error: Option<String>,
}

#[derive(Debug)]
struct ElementEntry {
    element: NodeRef,
    /// Originals behind the element's placeholders, by index.
    preserved: Vec<NodeRef>,
    chunks: BTreeMap<usize, ChunkResult>,
    total_chunks: usize,
    state: EntryState,
}

/// Content-side reassembler: accumulates per-chunk results and swaps the
/// translated markup into each element once it is complete.
pub struct DomApplier {
    entries: Vec<ElementEntry>,
    unit_index: HashMap<usize, (usize, usize)>,
    policy: LinkPolicy,
    translated_chunks: usize,
}

impl DomApplier {
    pub fn new(extraction: &Extraction, policy: LinkPolicy) -> Self {
        let mut entries: Vec<ElementEntry> = extraction
            .elements
            .iter()
            .map(|element| ElementEntry {
                element: element.clone(),
                preserved: preserved_nodes(element),
                chunks: BTreeMap::new(),
                total_chunks: 1,
                state: EntryState::Pending,
            })
            .collect();
        let mut unit_index = HashMap::with_capacity(extraction.units.len());
        for su in &extraction.units {
            if let Some(entry) = entries.get_mut(su.element_index) {
                entry.total_chunks = su.total_chunks;
            }
            unit_index.insert(su.unit.id, (su.element_index, su.chunk_index));
        }
        Self {
            entries,
            unit_index,
            policy,
            translated_chunks: 0,
        }
    }

    pub fn record(&mut self, item: &BatchResultItem) -> Transition {
        let Some(&(element_index, chunk_index)) = self.unit_index.get(&item.id) else {
            debug!(id = item.id, "result for unknown unit ignored");
            return Transition::Ignored;
        };
        let Some(entry) = self.entries.get_mut(element_index) else {
            return Transition::Ignored;
        };
        if entry.state.is_terminal() {
            return Transition::Ignored;
        }

        let is_new = !entry.chunks.contains_key(&chunk_index);
        if is_new && item.error.is_none() && !item.translated_html.trim().is_empty() {
            self.translated_chunks += 1;
        }
        entry.chunks.insert(
            chunk_index,
            ChunkResult {
                translated_html: item.translated_html.clone(),
                error: item.error.clone(),
            },
        );

        if let Some(err) = item.error.as_deref() {
            let msg = err.to_string();
            mark_errored(entry, &msg);
            return Transition::Errored(msg);
        }
        if entry.chunks.len() < entry.total_chunks {
            return Transition::Recorded;
        }
        finalize(entry, &self.policy)
    }

    /// Error every entry still pending. Returns how many were swept.
    pub fn fail_pending(&mut self, message: &str) -> usize {
        let mut n = 0;
        for entry in self.entries.iter_mut() {
            if entry.state == EntryState::Pending {
                mark_errored(entry, message);
                n += 1;
            }
        }
        if n > 0 {
            warn!(count = n, message, "pending elements marked as errored");
        }
        n
    }

    pub fn sweep_missing(&mut self) -> usize {
        self.fail_pending(MISSING_CHUNKS)
    }

    pub fn element_of(&self, unit_id: usize) -> Option<usize> {
        self.unit_index.get(&unit_id).map(|&(element_index, _)| element_index)
    }

    pub fn state(&self, element_index: usize) -> Option<&EntryState> {
        self.entries.get(element_index).map(|e| &e.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn applied_count(&self) -> usize {
        self.count(|s| *s == EntryState::Applied)
    }

    pub fn errored_count(&self) -> usize {
        self.count(|s| matches!(s, EntryState::Errored(_)))
    }

    pub fn pending_count(&self) -> usize {
        self.count(|s| *s == EntryState::Pending)
    }

    pub fn translated_chunk_count(&self) -> usize {
        self.translated_chunks
    }

    fn count(&self, f: impl Fn(&EntryState) -> bool) -> usize {
        self.entries.iter().filter(|e| f(&e.state)).count()
    }
}

fn finalize(entry: &mut ElementEntry, policy: &LinkPolicy) -> Transition {
    let mut parts = Vec::with_capacity(entry.total_chunks);
    for index in 0..entry.total_chunks {
        match entry.chunks.get(&index) {
            Some(c) if c.error.is_none() && !c.translated_html.trim().is_empty() => {
                parts.push(c.translated_html.trim());
            }
            Some(_) => {
                mark_errored(entry, EMPTY_OUTPUT);
                return Transition::Errored(EMPTY_OUTPUT.to_string());
            }
            None => return Transition::Recorded,
        }
    }
    let combined = parts.join(" ");

    let sanitized = match sanitize_html(&combined, policy) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "sanitizing translation failed, using plain text");
            String::new()
        }
    };
    if !sanitized.is_empty() {
        match parse_fragment_nodes(&sanitized) {
            Ok(nodes) => {
                replace_children(&entry.element, nodes);
                restore_preserved(&entry.element, &entry.preserved);
                entry.state = EntryState::Applied;
                return Transition::Applied;
            }
            Err(e) => warn!(error = %e, "parsing sanitized translation failed"),
        }
    }

    let plain = decode_basic_entities(&strip_tags(&combined));
    if plain.trim().is_empty() {
        mark_errored(entry, EMPTY_OUTPUT);
        return Transition::Errored(EMPTY_OUTPUT.to_string());
    }
    replace_children(&entry.element, vec![NodeRef::new_text(plain.trim())]);
    restore_preserved(&entry.element, &entry.preserved);
    entry.state = EntryState::Applied;
    Transition::Applied
}

/// Swap each placeholder for its original node. Originals the model dropped
/// go back at the end; unknown or repeated placeholders are removed.
fn restore_preserved(element: &NodeRef, preserved: &[NodeRef]) {
    let mut used = vec![false; preserved.len()];
    let placeholders: Vec<(NodeRef, Option<usize>)> = element
        .descendants()
        .filter_map(|n| {
            let el = n.as_element()?;
            let marked = el.attributes.borrow().contains(PLACEHOLDER_ATTR);
            marked.then(|| (n.clone(), placeholder_index(el)))
        })
        .collect();
    for (ph, index) in placeholders {
        if let Some(i) = index.filter(|&i| i < preserved.len() && !used[i]) {
            used[i] = true;
            ph.insert_after(preserved[i].clone());
        }
        ph.detach();
    }
    for (original, used) in preserved.iter().zip(used) {
        if !used {
            debug!("placeholder missing from translation, appending original");
            element.append(original.clone());
        }
    }
}

fn replace_children(element: &NodeRef, nodes: Vec<NodeRef>) {
    let old: Vec<NodeRef> = element.children().collect();
    for child in old {
        child.detach();
    }
    for node in nodes {
        element.append(node);
    }
}

fn mark_errored(entry: &mut ElementEntry, message: &str) {
    entry.state = EntryState::Errored(message.to_string());
    let marker = format!(
        r#"<span {UI_ATTR}="error" class="page-translator-error" title="{}">⚠</span>"#,
        escape_attr(message)
    );
    match parse_fragment_nodes(&marker) {
        Ok(nodes) => {
            for node in nodes {
                entry.element.append(node);
            }
        }
        Err(e) => warn!(error = %e, "failed to build error marker"),
    }
}
