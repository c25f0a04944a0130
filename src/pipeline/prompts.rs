use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::PromptsSection;
use crate::sentinels::UNIT_SEPARATOR;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_STANDARD: &str = "translate_html.txt";
pub const DEFAULT_STRICT: &str = "translate_html_strict.txt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptMode {
    Standard,
    Strict,
}

/// System prompt templates for batch translation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptSet {
    pub standard: String,
    pub strict: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            standard: DEFAULT_STANDARD_TEXT.to_string(),
            strict: DEFAULT_STRICT_TEXT.to_string(),
        }
    }
}

impl PromptSet {
    /// Explicit overrides must exist; otherwise `prompts/` beside the config
    /// is used when present, and the built-in text when not.
    pub fn load(config_dir: &Path, p: &PromptsSection) -> anyhow::Result<Self> {
        Ok(Self {
            standard: read_prompt(config_dir, p.standard.as_deref(), DEFAULT_STANDARD)?
                .unwrap_or_else(|| DEFAULT_STANDARD_TEXT.to_string()),
            strict: read_prompt(config_dir, p.strict.as_deref(), DEFAULT_STRICT)?
                .unwrap_or_else(|| DEFAULT_STRICT_TEXT.to_string()),
        })
    }

    pub fn system_prompt(&self, mode: PromptMode, target_language: &str, instructions: &str) -> String {
        let template = match mode {
            PromptMode::Standard => &self.standard,
            PromptMode::Strict => &self.strict,
        };
        let instructions = instructions.trim();
        let instructions = if instructions.is_empty() {
            "(none)"
        } else {
            instructions
        };
        render_template(
            template,
            &[
                ("target_language", target_language),
                ("instructions", instructions),
                ("separator", UNIT_SEPARATOR),
            ],
        )
    }
}

fn read_prompt(
    config_dir: &Path,
    explicit: Option<&str>,
    default_filename: &str,
) -> anyhow::Result<Option<String>> {
    let (path, required) = match explicit {
        Some(p) => (PathBuf::from(p), true),
        None => (PathBuf::from(DEFAULT_PROMPTS_DIR).join(default_filename), false),
    };
    let path = if path.is_relative() {
        config_dir.join(path)
    } else {
        path
    };
    if !path.exists() {
        if required {
            return Err(anyhow!(
                "prompt file not found: {} (run: page-translator --init-config)",
                path.display()
            ));
        }
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("read prompt: {}", path.display()))?;
    Ok(Some(text))
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_STANDARD, DEFAULT_STANDARD_TEXT),
        (DEFAULT_STRICT, DEFAULT_STRICT_TEXT),
    ]
}

pub const DEFAULT_STANDARD_TEXT: &str = r#"You are a professional translator working on fragments of a web page.
Translate the human-readable text of each fragment into {{target_language}}.

- Translate only visible text. Keep every HTML tag, attribute name and attribute value exactly as given (you may translate the text of title attributes).
- Tags like <img data-ptx-keep="0"> stand for images and other embedded content. Copy them unchanged and keep them where they belong in the sentence.
- Do not add, remove, merge or reorder fragments.
- Fragments are separated by a line containing only {{separator}}. Output the same number of fragments, in the same order, separated by the same line.
- Output only the translated fragments. No explanations, no code fences.

Additional instructions:
{{instructions}}"#;

pub const DEFAULT_STRICT_TEXT: &str = r#"You translate HTML fragments into {{target_language}}. Your previous answer could not be used. Follow every rule exactly.

RULE 1. The input contains N fragments separated by lines that contain only {{separator}}.
RULE 2. Output exactly N fragments separated by exactly N-1 lines that contain only {{separator}}.
RULE 3. Fragment k of the output is the translation of fragment k of the input. Never merge or split fragments.
RULE 4. Keep all HTML tags and attributes unchanged. Translate text only.
RULE 5. Copy every <img data-ptx-keep="N"> tag unchanged, once, at the matching place in the sentence.
RULE 6. If a fragment needs no translation, copy it unchanged.
RULE 7. Output nothing else: no commentary, no numbering, no code fences.

Additional instructions:
{{instructions}}"#;
