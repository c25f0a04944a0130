use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::batcher::{build_batches, BatchLimits};
use crate::ir::TranslationUnit;
use crate::providers::{build_model, LanguageModel, ProviderSettings};
use crate::retry::{RateLimitRetry, RetryConfig, Sleeper, ThreadSleeper};
use crate::transport::{
    ClientMessage, Port, ServerMessage, TranslationResultMessage, TransportError,
};

use super::prompts::PromptSet;
use super::registry::{RunHandle, RunRegistry, TabId};
use super::trace::TraceWriter;
use super::translator::BatchTranslator;

pub const CANCELLED: &str = "Translation cancelled";

pub type ModelFactory =
    Arc<dyn Fn(&ProviderSettings) -> anyhow::Result<Box<dyn LanguageModel>> + Send + Sync>;

/// Everything the background side needs for a run.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub provider: ProviderSettings,
    pub limits: BatchLimits,
    pub max_output_tokens: usize,
    pub retry: RetryConfig,
    pub prompts: PromptSet,
    pub trace_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            limits: BatchLimits::default(),
            max_output_tokens: 4096,
            retry: RetryConfig::default(),
            prompts: PromptSet::default(),
            trace_dir: None,
        }
    }
}

/// Background side: owns the provider and serves one port per tab.
#[derive(Clone)]
pub struct TranslationService {
    config: Arc<ServiceConfig>,
    registry: Arc<RunRegistry>,
    factory: ModelFactory,
    sleeper: Arc<dyn Sleeper + Sync>,
}

impl TranslationService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(RunRegistry::new()),
            factory: Arc::new(build_model),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_model_factory(mut self, factory: ModelFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper + Sync>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn spawn(&self, tab: TabId, port: Port) -> anyhow::Result<JoinHandle<()>> {
        let service = self.clone();
        std::thread::Builder::new()
            .name(format!("page-translator-tab-{tab}"))
            .spawn(move || {
                if let Err(e) = service.serve(tab, &port) {
                    warn!(tab, error = %e, "port closed during run");
                }
            })
            .context("spawn background thread")
    }

    /// Handle messages until the content side goes away.
    pub fn serve(&self, tab: TabId, port: &Port) -> Result<(), TransportError> {
        let mut queued: Option<ClientMessage> = None;
        loop {
            let msg = match queued.take() {
                Some(m) => m,
                None => match port.recv::<ClientMessage>() {
                    Ok(m) => m,
                    Err(TransportError::Disconnected) => {
                        debug!(tab, "port disconnected");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(tab, error = %e, "ignoring malformed message");
                        continue;
                    }
                },
            };
            match msg {
                ClientMessage::StartHtmlTranslation {
                    request_id,
                    units,
                    target_language,
                } => {
                    queued = self.run(tab, port, &request_id, &units, &target_language)?;
                }
                ClientMessage::CancelHtmlTranslation { request_id } => {
                    debug!(tab, %request_id, "cancel for a run that is not active");
                }
            }
        }
    }

    /// One run. Returns a start request that arrived mid-run, if any.
    fn run(
        &self,
        tab: TabId,
        port: &Port,
        request_id: &str,
        units: &[TranslationUnit],
        target_language: &str,
    ) -> Result<Option<ClientMessage>, TransportError> {
        let handle = self.registry.begin(tab);
        let result = self.run_batches(&handle, port, request_id, units, target_language);
        if result.is_err() {
            handle.token.cancel();
        }
        self.registry.finish(&handle);
        result
    }

    fn run_batches(
        &self,
        handle: &RunHandle,
        port: &Port,
        request_id: &str,
        units: &[TranslationUnit],
        target_language: &str,
    ) -> Result<Option<ClientMessage>, TransportError> {
        info!(tab = handle.tab, %request_id, units = units.len(), "translation run started");
        let done = |error: Option<String>| {
            port.send(&ServerMessage::HtmlTranslationResult(
                TranslationResultMessage::done(request_id, error),
            ))
        };
        if units.is_empty() {
            done(None)?;
            return Ok(None);
        }

        let cfg = &self.config;
        if let Err(e) = cfg.provider.validate() {
            warn!(%request_id, error = %e, "run rejected");
            done(Some(e.to_string()))?;
            return Ok(None);
        }
        let model = match (self.factory)(&cfg.provider) {
            Ok(m) => m,
            Err(e) => {
                warn!(%request_id, error = %e, "model construction failed");
                done(Some(format!("{e:#}")))?;
                return Ok(None);
            }
        };
        let model = RateLimitRetry::with_sleeper(model, cfg.retry.clone(), self.sleeper.clone());
        let trace = self.trace_for(request_id);
        let translator = BatchTranslator::new(
            &model,
            &cfg.prompts,
            target_language,
            &cfg.provider.translation_instructions,
            cfg.max_output_tokens,
        )
        .with_trace(&trace);

        let batches = build_batches(units, &cfg.limits);
        let batch_count = batches.len();
        let mut queued = None;
        let mut sent_batches = 0usize;
        for (batch_index, batch) in batches.iter().enumerate() {
            self.drain_port(handle, port, request_id, &mut queued)?;
            if handle.token.is_cancelled() {
                info!(%request_id, batch_index, "run cancelled");
                break;
            }
            debug!(%request_id, batch_index, batch_count, size = batch.len(), "translating batch");
            let mut send_error = None;
            translator.translate_batch(batch_index, batch, &mut |leaf| {
                if send_error.is_some() {
                    return;
                }
                let msg = TranslationResultMessage::progress(
                    request_id,
                    leaf.results.clone(),
                    batch_index,
                    batch_count,
                    batch.len(),
                    leaf.tag,
                );
                if let Err(e) = port.send(&ServerMessage::HtmlTranslationResult(msg)) {
                    send_error = Some(e);
                }
            });
            if let Some(e) = send_error {
                return Err(e);
            }
            sent_batches += 1;
        }

        let error = (handle.token.is_cancelled() && sent_batches == 0).then(|| CANCELLED.to_string());
        info!(%request_id, sent_batches, batch_count, "translation run finished");
        done(error)?;
        Ok(queued)
    }

    fn drain_port(
        &self,
        handle: &RunHandle,
        port: &Port,
        request_id: &str,
        queued: &mut Option<ClientMessage>,
    ) -> Result<(), TransportError> {
        loop {
            match port.try_recv::<ClientMessage>() {
                Ok(None) => return Ok(()),
                Ok(Some(ClientMessage::CancelHtmlTranslation { request_id: rid })) => {
                    if rid == request_id {
                        handle.token.cancel();
                    }
                }
                Ok(Some(start @ ClientMessage::StartHtmlTranslation { .. })) => {
                    handle.token.cancel();
                    *queued = Some(start);
                }
                Err(TransportError::Disconnected) => return Err(TransportError::Disconnected),
                Err(e) => warn!(error = %e, "ignoring malformed message"),
            }
        }
    }

    fn trace_for(&self, request_id: &str) -> TraceWriter {
        let Some(dir) = self.config.trace_dir.as_ref() else {
            return TraceWriter::disabled();
        };
        match TraceWriter::new(dir.clone(), true).and_then(|t| t.for_run(request_id)) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "trace disabled");
                TraceWriter::disabled()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Mutex};

    use super::*;
    use crate::providers::CompletionRequest;
    use crate::sentinels::{join_units, split_units};
    use crate::transport::port_pair;

    struct Upper;

    impl LanguageModel for Upper {
        fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String> {
            let parts: Vec<String> = split_units(&request.user_prompt)
                .into_iter()
                .map(|p| p.to_uppercase())
                .collect();
            Ok(join_units(parts.iter().map(String::as_str)))
        }
    }

    /// Uppercases like `Upper`, but reports each call and then waits for the
    /// test to open the gate once per call.
    struct Gated {
        called: mpsc::Sender<usize>,
        gate: Arc<Mutex<mpsc::Receiver<()>>>,
    }

    impl LanguageModel for Gated {
        fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String> {
            let parts = split_units(&request.user_prompt);
            self.called.send(parts.len()).unwrap();
            self.gate.lock().unwrap().recv().unwrap();
            let upper: Vec<String> = parts.iter().map(|p| p.to_uppercase()).collect();
            Ok(join_units(upper.iter().map(String::as_str)))
        }
    }

    fn gated_service(
        cfg: ServiceConfig,
    ) -> (TranslationService, mpsc::Receiver<usize>, mpsc::Sender<()>) {
        let (called_tx, called_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let called_tx = Mutex::new(called_tx);
        let gate_rx = Arc::new(Mutex::new(gate_rx));
        let svc = TranslationService::new(cfg).with_model_factory(Arc::new(
            move |_: &ProviderSettings| -> anyhow::Result<Box<dyn LanguageModel>> {
                Ok(Box::new(Gated {
                    called: called_tx.lock().unwrap().clone(),
                    gate: gate_rx.clone(),
                }))
            },
        ));
        (svc, called_rx, gate_tx)
    }

    fn config() -> ServiceConfig {
        ServiceConfig {
            provider: ProviderSettings {
                api_key: "k".into(),
                api_endpoint: "http://localhost:9".into(),
                model_name: "m".into(),
                ..ProviderSettings::default()
            },
            limits: BatchLimits {
                max_units_per_batch: 2,
                ..BatchLimits::default()
            },
            ..ServiceConfig::default()
        }
    }

    fn service(cfg: ServiceConfig) -> TranslationService {
        TranslationService::new(cfg).with_model_factory(Arc::new(
            |_: &ProviderSettings| -> anyhow::Result<Box<dyn LanguageModel>> { Ok(Box::new(Upper)) },
        ))
    }

    fn start(request_id: &str, n: usize) -> ClientMessage {
        ClientMessage::StartHtmlTranslation {
            request_id: request_id.into(),
            units: (0..n).map(|i| TranslationUnit::new(i, format!("u{i}"))).collect(),
            target_language: "German".into(),
        }
    }

    fn collect(port: &Port) -> Vec<TranslationResultMessage> {
        let mut out = Vec::new();
        loop {
            let ServerMessage::HtmlTranslationResult(m) = port.recv::<ServerMessage>().unwrap();
            let done = m.done;
            out.push(m);
            if done {
                return out;
            }
        }
    }

    #[test]
    fn streams_batches_then_one_done() {
        let (content, background) = port_pair();
        let handle = service(config()).spawn(1, background).unwrap();
        content.send(&start("r1", 5)).unwrap();
        let msgs = collect(&content);
        assert_eq!(msgs.len(), 4);
        for (i, m) in msgs[..3].iter().enumerate() {
            assert_eq!(m.batch_index, Some(i));
            assert_eq!(m.batch_count, Some(3));
            assert!(!m.done);
        }
        assert_eq!(msgs[0].results[1].translated_html, "U1");
        assert_eq!(msgs[2].batch_size, Some(1));
        assert!(msgs[3].done && msgs[3].error.is_none());
        drop(content);
        handle.join().unwrap();
    }

    #[test]
    fn configuration_error_is_terminal_without_model_call() {
        let mut cfg = config();
        cfg.provider.api_key.clear();
        let svc = TranslationService::new(cfg)
            .with_model_factory(Arc::new(
                |_: &ProviderSettings| -> anyhow::Result<Box<dyn LanguageModel>> {
                    panic!("model must not be built")
                },
            ));
        let (content, background) = port_pair();
        let handle = svc.spawn(1, background).unwrap();
        content.send(&start("r1", 2)).unwrap();
        let msgs = collect(&content);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].error.as_deref().unwrap().contains("API key"));
        drop(content);
        handle.join().unwrap();
    }

    #[test]
    fn cancel_before_first_batch_reports_error() {
        let (content, background) = port_pair();
        content.send(&start("r1", 3)).unwrap();
        content
            .send(&ClientMessage::CancelHtmlTranslation {
                request_id: "r1".into(),
            })
            .unwrap();
        let svc = service(config());
        let handle = svc.spawn(1, background).unwrap();
        let msgs = collect(&content);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].error.as_deref(), Some(CANCELLED));
        drop(content);
        handle.join().unwrap();
        assert_eq!(svc.registry().active_count(), 0);
    }

    #[test]
    fn empty_run_completes_immediately() {
        let (content, background) = port_pair();
        let handle = service(config()).spawn(3, background).unwrap();
        content.send(&start("r0", 0)).unwrap();
        let msgs = collect(&content);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].done && msgs[0].error.is_none());
        drop(content);
        handle.join().unwrap();
    }

    #[test]
    fn cancel_after_first_batch_finishes_cleanly() {
        let mut cfg = config();
        cfg.limits.max_units_per_batch = 1;
        let (svc, called, gate) = gated_service(cfg);
        let (content, background) = port_pair();
        let handle = svc.spawn(1, background).unwrap();
        content.send(&start("r1", 3)).unwrap();

        // Batch 0 is inside the model; the cancel lands before batch 1 starts.
        assert_eq!(called.recv().unwrap(), 1);
        content
            .send(&ClientMessage::CancelHtmlTranslation {
                request_id: "r1".into(),
            })
            .unwrap();
        gate.send(()).unwrap();

        let msgs = collect(&content);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].batch_index, Some(0));
        assert_eq!(msgs[0].batch_count, Some(3));
        assert_eq!(msgs[0].results[0].translated_html, "U0");
        assert!(!msgs[0].done);
        assert!(msgs[1].done);
        assert!(msgs[1].error.is_none());

        drop(content);
        handle.join().unwrap();
        assert!(called.try_recv().is_err());
        assert_eq!(svc.registry().active_count(), 0);
    }

    #[test]
    fn new_start_mid_run_cancels_and_is_served_next() {
        let mut cfg = config();
        cfg.limits.max_units_per_batch = 1;
        let (svc, called, gate) = gated_service(cfg);
        let (content, background) = port_pair();
        let handle = svc.spawn(1, background).unwrap();
        content.send(&start("r1", 3)).unwrap();

        assert_eq!(called.recv().unwrap(), 1);
        content.send(&start("r2", 2)).unwrap();
        for _ in 0..3 {
            gate.send(()).unwrap();
        }

        let first = collect(&content);
        assert!(first.iter().all(|m| m.request_id == "r1"));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].batch_index, Some(0));
        assert!(first[1].done && first[1].error.is_none());

        let second = collect(&content);
        assert!(second.iter().all(|m| m.request_id == "r2"));
        assert_eq!(
            second.iter().map(|m| m.batch_index).collect::<Vec<_>>(),
            vec![Some(0), Some(1), None]
        );
        assert_eq!(second[1].results[0].translated_html, "U1");
        assert!(second[2].done && second[2].error.is_none());

        drop(content);
        handle.join().unwrap();
        // One call for r1 before the restart, two for r2.
        assert_eq!(called.try_iter().count(), 2);
        assert_eq!(svc.registry().active_count(), 0);
    }
}
