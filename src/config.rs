use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::batcher::BatchLimits;
use crate::providers::{ApiType, ProviderSettings};
use crate::retry::RetryConfig;

pub const CONFIG_FILENAME: &str = "page-translator.toml";
pub const CONFIG_ENV: &str = "PAGE_TRANSLATOR_CONFIG";
pub const API_KEY_ENV: &str = "PAGE_TRANSLATOR_API_KEY";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ProviderSection {
    #[serde(default)]
    pub api_type: Option<ApiType>,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    /// Free-form text appended to the system prompt (tone, glossary, ...).
    #[serde(default)]
    pub translation_instructions: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct LimitsSection {
    /// Ceiling on a unit's serialized HTML, in characters.
    #[serde(default)]
    pub max_unit_chars: Option<usize>,
    #[serde(default)]
    pub max_batch_tokens: Option<usize>,
    #[serde(default)]
    pub max_units_per_batch: Option<usize>,
    #[serde(default)]
    pub chars_per_token: Option<usize>,
    #[serde(default)]
    pub max_output_tokens: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RetrySection {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
    #[serde(default)]
    pub jitter_ratio: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub target_language: Option<String>,
    /// Base URL of the page, used to resolve relative links.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub standard: Option<String>,
    #[serde(default)]
    pub strict: Option<String>,
}

impl ProviderSection {
    /// File values, with `PAGE_TRANSLATOR_API_KEY` taking precedence for the key.
    pub fn resolve(&self, env_api_key: Option<String>) -> ProviderSettings {
        let defaults = ProviderSettings::default();
        let api_type = self.api_type.unwrap_or_default();
        let api_key = env_api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone())
            .unwrap_or_default();
        ProviderSettings {
            api_key,
            api_endpoint: self
                .api_endpoint
                .clone()
                .unwrap_or_else(|| default_endpoint(api_type).to_string()),
            api_type,
            model_name: self.model_name.clone().unwrap_or_default(),
            translation_instructions: self.translation_instructions.clone().unwrap_or_default(),
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
        }
    }
}

pub fn default_endpoint(api_type: ApiType) -> &'static str {
    match api_type {
        ApiType::OpenAi => "https://api.openai.com/v1",
        ApiType::Anthropic => "https://api.anthropic.com/v1",
    }
}

impl LimitsSection {
    pub fn batch_limits(&self) -> BatchLimits {
        let d = BatchLimits::default();
        BatchLimits {
            max_batch_tokens: self.max_batch_tokens.unwrap_or(d.max_batch_tokens).max(1),
            max_units_per_batch: self.max_units_per_batch.unwrap_or(d.max_units_per_batch).max(1),
            chars_per_token: self.chars_per_token.unwrap_or(d.chars_per_token).max(1),
        }
    }
}

impl RetrySection {
    pub fn retry_config(&self) -> RetryConfig {
        let d = RetryConfig::default();
        RetryConfig {
            max_retries: self.max_retries.unwrap_or(d.max_retries),
            base_delay: self
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(d.base_delay),
            max_delay: self
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(d.max_delay),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(d.backoff_multiplier),
            jitter_ratio: self.jitter_ratio.unwrap_or(d.jitter_ratio).clamp(0.0, 1.0),
        }
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = Some(start_dir);
    for _ in 0..=max_levels {
        let d = dir?;
        let cand = d.join(filename);
        if cand.is_file() {
            return Some(cand);
        }
        dir = d.parent();
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text).with_context(|| format!("parse config: {}", path.display()))
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(text).context("parse config toml")?;
    Ok(cfg)
}
