use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::blocking::Response;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::textutil::truncate_chars;

mod anthropic;
mod openai;

pub use anthropic::AnthropicModel;
pub use openai::OpenAiModel;

/// One completion call: a system prompt plus the batch payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_output_tokens: usize,
}

/// The only capability the pipeline needs from a provider.
pub trait LanguageModel: Send {
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request)
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} returned {status}: {message}")]
    Http {
        provider: &'static str,
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Turn a non-success response into an error, keeping the status and any
    /// `Retry-After` header for the retry wrapper.
    pub(crate) fn from_response(provider: &'static str, resp: Response) -> Self {
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        ProviderError::Http {
            provider,
            status,
            message: truncate_chars(body.trim(), 500),
            retry_after,
        }
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    #[serde(alias = "openai-compatible", alias = "open_ai")]
    OpenAi,
    Anthropic,
}

impl ApiType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" | "open_ai" => Ok(ApiType::OpenAi),
            "anthropic" | "claude" => Ok(ApiType::Anthropic),
            other => Err(anyhow!("unknown api_type: {other}")),
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiType::OpenAi => f.write_str("openai"),
            ApiType::Anthropic => f.write_str("anthropic"),
        }
    }
}

/// Provider settings as resolved from config, environment and CLI flags.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_key: String,
    pub api_endpoint: String,
    pub api_type: ApiType,
    pub model_name: String,
    pub translation_instructions: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_endpoint: String::new(),
            api_type: ApiType::OpenAi,
            model_name: String::new(),
            translation_instructions: String::new(),
            request_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("api_endpoint", &self.api_endpoint)
            .field("api_type", &self.api_type)
            .field("model_name", &self.model_name)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ProviderSettings {
    /// Fails with `ProviderError::Configuration` before any network call.
    pub fn validate(&self) -> Result<(), ProviderError> {
        let mut missing = Vec::new();
        if self.api_key.trim().is_empty() {
            missing.push("API key");
        }
        if self.api_endpoint.trim().is_empty() {
            missing.push("API endpoint");
        }
        if self.model_name.trim().is_empty() {
            missing.push("model name");
        }
        if !missing.is_empty() {
            return Err(ProviderError::Configuration(format!(
                "missing {}",
                missing.join(", ")
            )));
        }
        normalize_base_url(&self.api_endpoint)
            .map(|_| ())
            .map_err(|e| ProviderError::Configuration(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

const ENDPOINT_SUFFIXES: &[&str] = &["/chat/completions", "/completions", "/messages"];

/// Reduce a user-supplied endpoint to the API base ending in a `/v1` segment.
pub fn normalize_base_url(endpoint: &str) -> Result<String> {
    let mut base = endpoint.trim().trim_end_matches('/').to_string();
    loop {
        let before = base.len();
        for suffix in ENDPOINT_SUFFIXES {
            if let Some(stripped) = base.strip_suffix(suffix) {
                base = stripped.trim_end_matches('/').to_string();
            }
        }
        if base.len() == before {
            break;
        }
    }
    let url = Url::parse(&base).map_err(|e| anyhow!("invalid API endpoint {endpoint}: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("API endpoint must be http(s): {endpoint}"));
    }
    let has_v1 = url
        .path_segments()
        .is_some_and(|mut segs| segs.any(|s| s == "v1"));
    if !has_v1 {
        base.push_str("/v1");
    }
    Ok(base)
}

pub fn build_model(settings: &ProviderSettings) -> Result<Box<dyn LanguageModel>> {
    settings.validate()?;
    let base = normalize_base_url(&settings.api_endpoint)?;
    let model: Box<dyn LanguageModel> = match settings.api_type {
        ApiType::OpenAi => Box::new(OpenAiModel::new(
            base,
            settings.api_key.clone(),
            settings.model_name.clone(),
            settings.timeout(),
        )?),
        ApiType::Anthropic => Box::new(AnthropicModel::new(
            base,
            settings.api_key.clone(),
            settings.model_name.clone(),
            settings.timeout(),
        )?),
    };
    Ok(model)
}
