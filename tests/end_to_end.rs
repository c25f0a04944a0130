use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use kuchiki::traits::*;
use kuchiki::NodeRef;

use page_translator::batcher::BatchLimits;
use page_translator::html::{extract_units, LinkPolicy, Transition};
use page_translator::ir::SubBatchTag;
use page_translator::page::{translate_document, PageOptions, PageProgress, RunSummary};
use page_translator::pipeline::{ServiceConfig, TranslationService};
use page_translator::providers::{CompletionRequest, LanguageModel, ProviderSettings};
use page_translator::retry::Sleeper;
use page_translator::sentinels::{join_units, split_units};
use page_translator::transport::port_pair;

/// Prefixes every part with `[de]`. Any batch containing `poison` comes back
/// with an extra part, so it never matches the expected shape.
struct MockModel {
    calls: Arc<Mutex<Vec<usize>>>,
    poison: Option<&'static str>,
    rate_limited_first: AtomicU32,
}

impl LanguageModel for MockModel {
    fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String> {
        if self.rate_limited_first.load(Ordering::SeqCst) > 0 {
            self.rate_limited_first.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("Rate limit exceeded, try again in 2.5s"));
        }
        let parts = split_units(&request.user_prompt);
        self.calls.lock().unwrap().push(parts.len());
        let mut out: Vec<String> = parts.iter().map(|p| format!("[de] {p}")).collect();
        if self.poison.is_some_and(|p| request.user_prompt.contains(p)) {
            out.push("extra".to_string());
        }
        Ok(join_units(out.iter().map(String::as_str)))
    }
}

#[derive(Clone, Default)]
struct RecordingSleeper(Arc<Mutex<Vec<Duration>>>);

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        self.0.lock().unwrap().push(delay);
    }
}

struct Harness {
    calls: Arc<Mutex<Vec<usize>>>,
    sleeps: RecordingSleeper,
    service: TranslationService,
}

fn harness(limits: BatchLimits, poison: Option<&'static str>, rate_limited: u32) -> Harness {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sleeps = RecordingSleeper::default();
    let cfg = ServiceConfig {
        provider: ProviderSettings {
            api_key: "test-key".into(),
            api_endpoint: "http://localhost:9".into(),
            model_name: "mock".into(),
            ..ProviderSettings::default()
        },
        limits,
        ..ServiceConfig::default()
    };
    let factory_calls = calls.clone();
    let service = TranslationService::new(cfg)
        .with_model_factory(Arc::new(
            move |_: &ProviderSettings| -> anyhow::Result<Box<dyn LanguageModel>> {
                Ok(Box::new(MockModel {
                    calls: factory_calls.clone(),
                    poison,
                    rate_limited_first: AtomicU32::new(rate_limited),
                }))
            },
        ))
        .with_sleeper(Arc::new(sleeps.clone()));
    Harness {
        calls,
        sleeps,
        service,
    }
}

fn run(
    harness: &Harness,
    document: &NodeRef,
    options: &PageOptions,
) -> (RunSummary, Vec<PageProgress>) {
    let (content, background) = port_pair();
    let worker = harness.service.spawn(7, background).unwrap();
    let mut seen = Vec::new();
    let summary =
        translate_document(document, &content, options, None, &mut |p| seen.push(p.clone()))
            .unwrap();
    drop(content);
    worker.join().unwrap();
    (summary, seen)
}

fn paragraphs(document: &NodeRef) -> Vec<String> {
    document
        .select("p")
        .unwrap()
        .map(|p| p.as_node().to_string())
        .collect()
}

#[test]
fn three_paragraphs_in_one_batch_are_all_applied() {
    let h = harness(BatchLimits::default(), None, 0);
    let document = kuchiki::parse_html()
        .one("<body><p>Hello <b>world</b>.</p><p>Second paragraph.</p><p>Third one here.</p></body>");
    let (summary, seen) = run(&h, &document, &PageOptions::default());

    assert_eq!(summary.elements, 3);
    assert_eq!(summary.applied, 3);
    assert_eq!(summary.errored, 0);
    assert!(summary.error.is_none());
    assert_eq!(*h.calls.lock().unwrap(), vec![3]);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].batch_count, 1);

    let ps = paragraphs(&document);
    assert_eq!(ps[0], "<p>[de] Hello <b>world</b>.</p>");
    assert_eq!(ps[1], "<p>[de] Second paragraph.</p>");
    assert_eq!(ps[2], "<p>[de] Third one here.</p>");
}

#[test]
fn oversized_paragraph_applies_only_after_last_chunk() {
    let html = "<body><p>The first sentence is here. The second sentence is here. The third sentence is here.</p></body>";
    let preview = kuchiki::parse_html().one(html);
    let extraction = extract_units(&preview, &LinkPolicy::default(), 40).unwrap();
    assert_eq!(extraction.units.len(), 3);
    assert!(extraction.units.iter().all(|u| u.total_chunks == 3));
    assert_eq!(
        extraction.units.iter().map(|u| u.chunk_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    let limits = BatchLimits {
        max_units_per_batch: 1,
        ..BatchLimits::default()
    };
    let h = harness(limits, None, 0);
    let document = kuchiki::parse_html().one(html);
    let options = PageOptions {
        max_unit_chars: 40,
        ..PageOptions::default()
    };
    let (summary, seen) = run(&h, &document, &options);

    assert_eq!(summary.units, 3);
    assert_eq!(summary.applied, 1);
    let transitions: Vec<Transition> = seen
        .iter()
        .flat_map(|p| p.transitions.iter().map(|(_, t)| t.clone()))
        .collect();
    assert_eq!(
        transitions,
        vec![Transition::Recorded, Transition::Recorded, Transition::Applied]
    );
    assert_eq!(seen[0].pending, 1);
    assert_eq!(seen[1].pending, 1);
    assert_eq!(seen[2].pending, 0);

    let p = &paragraphs(&document)[0];
    assert_eq!(p.matches("[de]").count(), 3);
    assert!(p.contains("first sentence"));
    assert!(p.contains("third sentence"));
}

#[test]
fn shape_mismatch_bisects_down_to_the_bad_unit() {
    let h = harness(BatchLimits::default(), Some("Gamma"), 0);
    let document = kuchiki::parse_html().one(
        "<body><p>Alpha text.</p><p>Beta text.</p><p>Gamma text.</p><p>Delta text.</p></body>",
    );
    let (summary, seen) = run(&h, &document, &PageOptions::default());

    // Standard and strict for 4, then [a,b], [c,d] twice, [c] twice, [d].
    assert_eq!(*h.calls.lock().unwrap(), vec![4, 4, 2, 2, 2, 1, 1, 1]);
    let tags: Vec<Option<SubBatchTag>> = seen.iter().map(|p| p.sub_batch).collect();
    assert_eq!(
        tags,
        vec![
            Some(SubBatchTag { index: 1, count: 2, size: 2 }),
            Some(SubBatchTag { index: 1, count: 2, size: 1 }),
            Some(SubBatchTag { index: 2, count: 2, size: 1 }),
        ]
    );

    assert_eq!(summary.applied, 3);
    assert_eq!(summary.errored, 1);
    assert!(summary.error.is_none());

    let ps = paragraphs(&document);
    assert_eq!(ps[0], "<p>[de] Alpha text.</p>");
    assert_eq!(ps[1], "<p>[de] Beta text.</p>");
    assert!(ps[2].contains("Gamma text."));
    assert!(ps[2].contains("page-translator-error"));
    assert!(ps[2].contains("Output shape mismatch"));
    assert_eq!(ps[3], "<p>[de] Delta text.</p>");
}

#[test]
fn rate_limit_hint_delays_then_succeeds() {
    let h = harness(BatchLimits::default(), None, 1);
    let document = kuchiki::parse_html().one("<body><p>Only paragraph.</p></body>");
    let (summary, _) = run(&h, &document, &PageOptions::default());

    assert_eq!(*h.sleeps.0.lock().unwrap(), vec![Duration::from_secs(3)]);
    assert_eq!(*h.calls.lock().unwrap(), vec![1]);
    assert_eq!(summary.applied, 1);
    assert_eq!(paragraphs(&document)[0], "<p>[de] Only paragraph.</p>");
}

#[test]
fn stale_results_for_another_request_are_ignored() {
    use page_translator::ir::BatchResultItem;
    use page_translator::transport::{
        ClientMessage, ServerMessage, TranslationResultMessage,
    };

    let document = kuchiki::parse_html().one("<body><p>Keep me.</p></body>");
    let (content, background) = port_pair();
    let server = std::thread::spawn(move || {
        let start: ClientMessage = background.recv().unwrap();
        let rid = start.request_id().to_string();
        background
            .send(&ServerMessage::HtmlTranslationResult(TranslationResultMessage::progress(
                "old-run",
                vec![BatchResultItem::ok(0, "wrong")],
                0,
                1,
                1,
                None,
            )))
            .unwrap();
        background
            .send(&ServerMessage::HtmlTranslationResult(TranslationResultMessage::done(
                &rid, None,
            )))
            .unwrap();
    });
    let summary =
        translate_document(&document, &content, &PageOptions::default(), None, &mut |_| {})
            .unwrap();
    server.join().unwrap();

    assert_eq!(summary.result_messages, 0);
    assert_eq!(summary.errored, 1);
    let p = &paragraphs(&document)[0];
    assert!(p.contains("Keep me."));
    assert!(p.contains("Missing translated chunk(s)"));
}

#[test]
fn images_and_hidden_text_come_back_after_translation() {
    let h = harness(BatchLimits::default(), None, 0);
    let document = kuchiki::parse_html().one(
        r#"<body><p>Click the <img src="gear.png" alt="gear"> icon <span hidden id="d">secret detail</span> now.</p></body>"#,
    );
    let img = document.select_first("img").unwrap().as_node().clone();
    let (summary, _) = run(&h, &document, &PageOptions::default());

    assert_eq!(summary.applied, 1);
    let p = &paragraphs(&document)[0];
    assert!(p.starts_with("<p>[de] Click the <img"), "{p}");
    assert!(!p.contains("data-ptx-keep"));
    assert!(*document.select_first("img").unwrap().as_node() == img);
    assert_eq!(document.select_first("#d").unwrap().text_contents(), "secret detail");
}
