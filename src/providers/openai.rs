use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionRequest, LanguageModel, ProviderError};

const PROVIDER: &str = "OpenAI-compatible API";

/// Chat-completions client for OpenAI and compatible gateways.
pub struct OpenAiModel {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiModel {
    pub fn new(base_url: String, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            base_url,
            api_key,
            model,
            client,
        })
    }
}

impl LanguageModel for OpenAiModel {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            max_tokens: request.max_output_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
        };
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %self.model, "chat completion request");
        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .context("failed to call chat completions")?;
        if !resp.status().is_success() {
            return Err(ProviderError::from_response(PROVIDER, resp).into());
        }
        let parsed: ChatResponse = resp.json().context("failed to parse chat completion response")?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderError::InvalidResponse {
                    provider: PROVIDER,
                    message: "no message content in choices".to_string(),
                }
                .into()
            })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let body = ChatRequest {
            model: "m",
            temperature: 0.0,
            max_tokens: 256,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "sys",
                },
                ChatMessage {
                    role: "user",
                    content: "hi",
                },
            ],
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["model"], "m");
        assert_eq!(v["max_tokens"], 256);
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "hi");
    }

    #[test]
    fn parses_first_content() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":null}},
                      {"message":{"role":"assistant","content":"Hallo"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let text = parsed.choices.into_iter().find_map(|c| c.message.content);
        assert_eq!(text.as_deref(), Some("Hallo"));
    }
}
