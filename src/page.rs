//! Content side of a run: extract units from the document, hand them to the
//! background side, and apply results as they stream back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kuchiki::NodeRef;
use tracing::{debug, info, warn};

use crate::html::{extract_units, DomApplier, LinkPolicy, Transition};
use crate::ir::SubBatchTag;
use crate::pipeline::CancelToken;
use crate::transport::{ClientMessage, Port, ServerMessage, TransportError};

pub const DISCONNECTED: &str = "Connection closed unexpectedly";
pub const CANCELLED: &str = "Translation cancelled";

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> String {
    format!("html-{}", NEXT_REQUEST.fetch_add(1, Ordering::SeqCst))
}

#[derive(Clone, Debug)]
pub struct PageOptions {
    /// Generated when empty.
    pub request_id: String,
    pub target_language: String,
    pub max_unit_chars: usize,
    pub base_url: Option<String>,
    /// How often the cancel token is checked while waiting for results.
    pub poll_interval: Duration,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            request_id: String::new(),
            target_language: "English".to_string(),
            max_unit_chars: 1500,
            base_url: None,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// One applied result message, as seen by an observer.
#[derive(Clone, Debug)]
pub struct PageProgress {
    pub batch_index: usize,
    pub batch_count: usize,
    pub sub_batch: Option<SubBatchTag>,
    /// `(element_index, transition)` for every result in the message.
    pub transitions: Vec<(usize, Transition)>,
    pub applied: usize,
    pub errored: usize,
    pub pending: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub request_id: String,
    pub units: usize,
    pub elements: usize,
    pub applied: usize,
    pub errored: usize,
    pub translated_chunks: usize,
    pub result_messages: usize,
    pub cancelled: bool,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn status_line(&self) -> String {
        if self.elements == 0 {
            return "Nothing to translate".to_string();
        }
        if let Some(err) = self.error.as_deref() {
            return format!("Translation failed: {err}");
        }
        if self.cancelled {
            return format!(
                "Translation cancelled ({}/{} elements translated)",
                self.applied, self.elements
            );
        }
        if self.errored == 0 {
            format!("Translated {} elements", self.applied)
        } else {
            format!(
                "Translated {}/{} elements ({} failed)",
                self.applied, self.elements, self.errored
            )
        }
    }
}

/// Translate `document` in place. Per-element failures end up as inline
/// markers; the summary only carries run-level errors.
pub fn translate_document(
    document: &NodeRef,
    port: &Port,
    options: &PageOptions,
    cancel: Option<&CancelToken>,
    observer: &mut dyn FnMut(&PageProgress),
) -> anyhow::Result<RunSummary> {
    let request_id = if options.request_id.is_empty() {
        next_request_id()
    } else {
        options.request_id.clone()
    };
    let policy = LinkPolicy::from_base_str(options.base_url.as_deref())?;
    let extraction = extract_units(document, &policy, options.max_unit_chars)?;
    let mut summary = RunSummary {
        request_id: request_id.clone(),
        units: extraction.units.len(),
        elements: extraction.elements.len(),
        ..RunSummary::default()
    };
    if extraction.is_empty() {
        info!(%request_id, "no translatable content");
        return Ok(summary);
    }
    info!(
        %request_id,
        units = summary.units,
        elements = summary.elements,
        "starting page translation"
    );

    let mut applier = DomApplier::new(&extraction, policy);
    let start = ClientMessage::StartHtmlTranslation {
        request_id: request_id.clone(),
        units: extraction.translation_units(),
        target_language: options.target_language.clone(),
    };
    if port.send(&start).is_err() {
        applier.fail_pending(DISCONNECTED);
        summary.error = Some(DISCONNECTED.to_string());
        return Ok(finish(summary, &mut applier));
    }

    loop {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            let _ = port.send(&ClientMessage::CancelHtmlTranslation {
                request_id: request_id.clone(),
            });
            applier.fail_pending(CANCELLED);
            summary.cancelled = true;
            break;
        }
        let msg = match port.recv_timeout::<ServerMessage>(options.poll_interval) {
            Ok(None) => continue,
            Ok(Some(ServerMessage::HtmlTranslationResult(msg))) => msg,
            Err(TransportError::Disconnected) => {
                applier.fail_pending(DISCONNECTED);
                summary.error = Some(DISCONNECTED.to_string());
                break;
            }
            Err(e) => {
                warn!(error = %e, "ignoring malformed message");
                continue;
            }
        };
        if msg.request_id != request_id {
            debug!(expected = %request_id, got = %msg.request_id, "discarding result for another run");
            continue;
        }

        if !msg.results.is_empty() {
            summary.result_messages += 1;
            let transitions = msg
                .results
                .iter()
                .filter_map(|item| {
                    let element = applier.element_of(item.id)?;
                    Some((element, applier.record(item)))
                })
                .collect();
            observer(&PageProgress {
                batch_index: msg.batch_index.unwrap_or(0),
                batch_count: msg.batch_count.unwrap_or(0),
                sub_batch: msg.sub_batch(),
                transitions,
                applied: applier.applied_count(),
                errored: applier.errored_count(),
                pending: applier.pending_count(),
            });
        }

        if msg.done {
            if let Some(err) = msg.error {
                applier.fail_pending(&err);
                summary.error = Some(err);
            }
            break;
        }
    }

    Ok(finish(summary, &mut applier))
}

fn finish(mut summary: RunSummary, applier: &mut DomApplier) -> RunSummary {
    applier.sweep_missing();
    summary.applied = applier.applied_count();
    summary.errored = applier.errored_count();
    summary.translated_chunks = applier.translated_chunk_count();
    info!(request_id = %summary.request_id, status = %summary.status_line(), "page translation finished");
    summary
}
