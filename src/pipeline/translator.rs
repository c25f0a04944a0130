use tracing::{debug, info, warn};

use crate::ir::{BatchResultItem, SubBatchTag, TranslationUnit};
use crate::providers::{CompletionRequest, LanguageModel};
use crate::sentinels::{join_units, split_units};

use super::prompts::{PromptMode, PromptSet};
use super::trace::TraceWriter;

pub const EMPTY_OUTPUT: &str = "Empty translation output";

/// Results of one batch or sub-batch that resolved without further splitting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafReport {
    pub tag: Option<SubBatchTag>,
    pub results: Vec<BatchResultItem>,
}

/// Translates one batch with the standard prompt, falls back to the strict
/// prompt, then bisects until every unit has a result.
pub struct BatchTranslator<'a, M: LanguageModel + ?Sized> {
    model: &'a M,
    prompts: &'a PromptSet,
    target_language: &'a str,
    instructions: &'a str,
    max_output_tokens: usize,
    trace: Option<&'a TraceWriter>,
}

enum Attempt {
    Parts(Vec<String>),
    Failed(String),
}

impl<'a, M: LanguageModel + ?Sized> BatchTranslator<'a, M> {
    pub fn new(
        model: &'a M,
        prompts: &'a PromptSet,
        target_language: &'a str,
        instructions: &'a str,
        max_output_tokens: usize,
    ) -> Self {
        Self {
            model,
            prompts,
            target_language,
            instructions,
            max_output_tokens,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: &'a TraceWriter) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Always returns exactly one item per input unit, in input order. Each
    /// resolved leaf is also handed to `on_leaf` as soon as it is known.
    pub fn translate_batch(
        &self,
        batch_index: usize,
        units: &[TranslationUnit],
        on_leaf: &mut dyn FnMut(&LeafReport),
    ) -> Vec<BatchResultItem> {
        let mut out = Vec::with_capacity(units.len());
        self.translate_recursive(&format!("batch{batch_index:04}"), units, None, on_leaf, &mut out);
        out
    }

    fn translate_recursive(
        &self,
        label: &str,
        units: &[TranslationUnit],
        tag: Option<SubBatchTag>,
        on_leaf: &mut dyn FnMut(&LeafReport),
        out: &mut Vec<BatchResultItem>,
    ) {
        if units.is_empty() {
            return;
        }

        let failure = match self.attempt(label, units, PromptMode::Standard) {
            Attempt::Parts(parts) => return self.emit(units, parts, tag, on_leaf, out),
            Attempt::Failed(msg) => msg,
        };
        debug!(label, units = units.len(), error = %failure, "retrying with strict prompt");
        let failure = match self.attempt(label, units, PromptMode::Strict) {
            Attempt::Parts(parts) => return self.emit(units, parts, tag, on_leaf, out),
            Attempt::Failed(msg) => msg,
        };

        if units.len() > 1 {
            let mid = units.len() / 2;
            info!(label, units = units.len(), error = %failure, "bisecting batch");
            let (left, right) = units.split_at(mid);
            let left_tag = SubBatchTag {
                index: 1,
                count: 2,
                size: left.len(),
            };
            let right_tag = SubBatchTag {
                index: 2,
                count: 2,
                size: right.len(),
            };
            self.translate_recursive(&format!("{label}.1"), left, Some(left_tag), on_leaf, out);
            self.translate_recursive(&format!("{label}.2"), right, Some(right_tag), on_leaf, out);
            return;
        }

        warn!(label, id = units[0].id, error = %failure, "unit failed");
        let results = vec![BatchResultItem::failed(units[0].id, failure)];
        on_leaf(&LeafReport {
            tag,
            results: results.clone(),
        });
        out.extend(results);
    }

    fn attempt(&self, label: &str, units: &[TranslationUnit], mode: PromptMode) -> Attempt {
        let stage = match mode {
            PromptMode::Standard => "standard",
            PromptMode::Strict => "strict",
        };
        let request = CompletionRequest {
            system_prompt: self
                .prompts
                .system_prompt(mode, self.target_language, self.instructions),
            user_prompt: join_units(units.iter().map(|u| u.html.as_str())),
            max_output_tokens: self.max_output_tokens,
        };
        if let Some(trace) = self.trace {
            let _ = trace.write_named_text(
                &format!("{label}.{stage}.prompt.txt"),
                &format!("{}\n\n---\n\n{}", request.system_prompt, request.user_prompt),
            );
        }

        let raw = match self.model.complete(&request) {
            Ok(raw) => raw,
            Err(e) => return Attempt::Failed(format!("{e:#}")),
        };
        if let Some(trace) = self.trace {
            let _ = trace.write_named_text(&format!("{label}.{stage}.output.raw.txt"), &raw);
        }

        let parts = split_units(&cleanup_model_text(&raw));
        if parts.len() != units.len() {
            return Attempt::Failed(format!(
                "Output shape mismatch: expected {} part(s), got {}",
                units.len(),
                parts.len()
            ));
        }
        Attempt::Parts(parts)
    }

    fn emit(
        &self,
        units: &[TranslationUnit],
        parts: Vec<String>,
        tag: Option<SubBatchTag>,
        on_leaf: &mut dyn FnMut(&LeafReport),
        out: &mut Vec<BatchResultItem>,
    ) {
        let results: Vec<BatchResultItem> = units
            .iter()
            .zip(parts)
            .map(|(unit, part)| {
                if part.is_empty() {
                    BatchResultItem::failed(unit.id, EMPTY_OUTPUT)
                } else {
                    BatchResultItem::ok(unit.id, part)
                }
            })
            .collect();
        on_leaf(&LeafReport {
            tag,
            results: results.clone(),
        });
        out.extend(results);
    }
}

/// Strip a surrounding Markdown code fence.
pub fn cleanup_model_text(text: &str) -> String {
    let mut s = text.trim().to_string();
    if s.starts_with("```") {
        if let Some(i) = s.find('\n') {
            s = s[i + 1..].to_string();
        } else {
            s.clear();
        }
        if let Some(end) = s.rfind("```") {
            s.truncate(end);
        }
    }
    s.trim().to_string()
}
