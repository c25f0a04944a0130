pub mod apply;
pub mod chunk;
pub mod extract;
pub mod sanitize;
pub mod serialize;
pub mod tags;

pub use apply::{DomApplier, EntryState, Transition};
pub use extract::{extract_units, is_safe_translation_unit, Extraction, MIN_UNIT_CHARS};
pub use sanitize::{sanitize_html, LinkPolicy};
