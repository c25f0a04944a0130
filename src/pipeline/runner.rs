use std::path::Path;

use anyhow::{anyhow, Context};
use kuchiki::traits::*;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde_json::json;

use crate::batcher::{batch_tokens, build_batches};
use crate::html::{extract_units, LinkPolicy};
use crate::page::{translate_document, RunSummary};
use crate::progress::ConsoleProgress;
use crate::transport::port_pair;

use super::config::PipelineConfig;
use super::service::TranslationService;

static META_CHARSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_\-:.]+)"#).expect("meta charset regex")
});

/// Drives one HTML document through both sides of the pipeline in-process.
pub struct TranslatorPipeline {
    cfg: PipelineConfig,
    progress: ConsoleProgress,
    service: TranslationService,
}

impl TranslatorPipeline {
    pub fn new(cfg: PipelineConfig, progress: ConsoleProgress) -> Self {
        let service = TranslationService::new(cfg.service_config());
        Self {
            cfg,
            progress,
            service,
        }
    }

    pub fn with_service(mut self, service: TranslationService) -> Self {
        self.service = service;
        self
    }

    pub fn translate_file(&self, input: &Path, output: &Path) -> anyhow::Result<RunSummary> {
        let bytes = std::fs::read(input).with_context(|| format!("read input: {}", input.display()))?;
        let html = decode_html_bytes(&bytes);
        self.progress.info(format!("Input: {}", input.display()));
        let (out, summary) = self.translate_html(&html)?;
        std::fs::write(output, out).with_context(|| format!("write output: {}", output.display()))?;
        self.progress.info(format!("Output: {}", output.display()));
        Ok(summary)
    }

    /// Returns the translated document and the run summary.
    pub fn translate_html(&self, html: &str) -> anyhow::Result<(String, RunSummary)> {
        let document = kuchiki::parse_html().one(html);
        let (content, background) = port_pair();
        let worker = self.service.spawn(0, background)?;

        let summary = translate_document(
            &document,
            &content,
            &self.cfg.page_options(),
            None,
            &mut |p| self.progress.page(p),
        );
        drop(content);
        worker
            .join()
            .map_err(|_| anyhow!("background thread panicked"))?;
        let summary = summary?;
        self.progress.summary(&summary);
        Ok((document.to_string(), summary))
    }

    /// Extraction and batch plan, without calling any provider.
    pub fn dump_units(&self, html: &str) -> anyhow::Result<serde_json::Value> {
        let document = kuchiki::parse_html().one(html);
        let policy = LinkPolicy::from_base_str(self.cfg.base_url.as_deref())?;
        let extraction = extract_units(&document, &policy, self.cfg.max_unit_chars)?;
        let units: Vec<serde_json::Value> = extraction
            .units
            .iter()
            .map(|u| {
                json!({
                    "id": u.unit.id,
                    "html": u.unit.html,
                    "elementIndex": u.element_index,
                    "chunkIndex": u.chunk_index,
                    "totalChunks": u.total_chunks,
                })
            })
            .collect();
        let batches: Vec<serde_json::Value> = build_batches(&extraction.translation_units(), &self.cfg.limits)
            .iter()
            .map(|b| {
                json!({
                    "ids": b.iter().map(|u| u.id).collect::<Vec<_>>(),
                    "estimatedTokens": batch_tokens(b, &self.cfg.limits),
                })
            })
            .collect();
        Ok(json!({
            "elements": extraction.elements.len(),
            "units": units,
            "batches": batches,
        }))
    }
}

/// BOM first, then a `<meta charset>` in the head, then UTF-8.
pub fn decode_html_bytes(bytes: &[u8]) -> String {
    if let Some((enc, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        let (text, _) = enc.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }
    let head = &bytes[..bytes.len().min(1024)];
    let enc = META_CHARSET_RE
        .captures(head)
        .and_then(|c| encoding_rs::Encoding::for_label(&c[1]))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, _, _) = enc.decode(bytes);
    text.into_owned()
}
