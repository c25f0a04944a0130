use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::batcher::BatchLimits;
use crate::config::{
    find_default_config, load_config, AppConfig, API_KEY_ENV, CONFIG_ENV, CONFIG_FILENAME,
};
use crate::html::MIN_UNIT_CHARS;
use crate::page::PageOptions;
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};
use crate::pipeline::service::ServiceConfig;
use crate::providers::ProviderSettings;
use crate::retry::RetryConfig;

pub const DEFAULT_MAX_UNIT_CHARS: usize = 1500;
pub const DEFAULT_MAX_OUTPUT_TOKENS: usize = 4096;
pub const DEFAULT_TARGET_LANGUAGE: &str = "English";
pub const DEFAULT_TRACE_DIR: &str = "_trace";

/// Command-line values that win over the config file.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub target_language: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: PathBuf,
    pub provider: ProviderSettings,
    pub limits: BatchLimits,
    pub max_unit_chars: usize,
    pub max_output_tokens: usize,
    pub retry: RetryConfig,
    pub target_language: String,
    pub base_url: Option<String>,
    pub trace_dir: Option<PathBuf>,
    pub prompts: PromptSet,
}

impl PipelineConfig {
    pub fn from_paths_and_args(input: &Path, overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = overrides
            .config_path
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            } else if overrides.config_path.is_some() {
                return Err(anyhow::anyhow!("config not found: {}", p.display()));
            }
        }
        let config_path = cfg_file.unwrap_or_else(|| workdir.join(CONFIG_FILENAME));
        Self::from_app_config(&file_cfg, &config_path, overrides, std::env::var(API_KEY_ENV).ok())
    }

    pub fn from_app_config(
        file_cfg: &AppConfig,
        config_path: &Path,
        overrides: &ConfigOverrides,
        env_api_key: Option<String>,
    ) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

        let mut provider = file_cfg.provider.resolve(env_api_key);
        if let Some(k) = overrides.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            provider.api_key = k.trim().to_string();
        }
        if let Some(m) = overrides.model_name.as_ref().filter(|m| !m.trim().is_empty()) {
            provider.model_name = m.trim().to_string();
        }

        let target_language = overrides
            .target_language
            .clone()
            .or_else(|| file_cfg.pipeline.target_language.clone())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_TARGET_LANGUAGE.to_string());
        let base_url = overrides
            .base_url
            .clone()
            .or_else(|| file_cfg.pipeline.base_url.clone())
            .filter(|s| !s.trim().is_empty());

        let trace_dir = if file_cfg.pipeline.trace_prompts.unwrap_or(false) {
            let mut p = PathBuf::from(
                file_cfg
                    .pipeline
                    .trace_dir
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TRACE_DIR.to_string()),
            );
            if p.is_relative() {
                p = config_dir.join(&p);
            }
            Some(p)
        } else {
            None
        };

        let prompts = PromptSet::load(config_dir, &file_cfg.prompts)?;

        Ok(Self {
            config_path: config_path.to_path_buf(),
            provider,
            limits: file_cfg.limits.batch_limits(),
            max_unit_chars: file_cfg
                .limits
                .max_unit_chars
                .unwrap_or(DEFAULT_MAX_UNIT_CHARS)
                .max(MIN_UNIT_CHARS),
            max_output_tokens: file_cfg
                .limits
                .max_output_tokens
                .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS)
                .max(1),
            retry: file_cfg.retry.retry_config(),
            target_language,
            base_url,
            trace_dir,
            prompts,
        })
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            provider: self.provider.clone(),
            limits: self.limits,
            max_output_tokens: self.max_output_tokens,
            retry: self.retry.clone(),
            prompts: self.prompts.clone(),
            trace_dir: self.trace_dir.clone(),
        }
    }

    pub fn page_options(&self) -> PageOptions {
        PageOptions {
            target_language: self.target_language.clone(),
            max_unit_chars: self.max_unit_chars,
            base_url: self.base_url.clone(),
            ..PageOptions::default()
        }
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[provider]
# "openai" (any OpenAI-compatible chat completions API) or "anthropic".
api_type = "openai"
api_endpoint = "https://api.openai.com/v1"
# Prefer the PAGE_TRANSLATOR_API_KEY environment variable over storing the key here.
api_key = ""
model_name = "gpt-4o-mini"
translation_instructions = ""
request_timeout_secs = 120

[limits]
max_unit_chars = 1500
max_batch_tokens = 3000
max_units_per_batch = 40
chars_per_token = 4
max_output_tokens = 4096

[retry]
max_retries = 4
base_delay_ms = 1000
max_delay_ms = 30000
backoff_multiplier = 2.0
jitter_ratio = 0.3

[pipeline]
target_language = "English"
# base_url = "https://example.com/article"
trace_dir = "_trace"
trace_prompts = false

[prompts]
standard = "prompts/translate_html.txt"
strict = "prompts/translate_html_strict.txt"
"#;
