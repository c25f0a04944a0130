mod config;
pub mod prompts;
pub mod registry;
mod runner;
pub mod service;
pub mod trace;
pub mod translator;

pub use config::{init_default_config, ConfigOverrides, PipelineConfig};
pub use prompts::{PromptMode, PromptSet};
pub use runner::{decode_html_bytes, TranslatorPipeline};
pub use registry::{CancelToken, RunRegistry, TabId};
pub use service::{ModelFactory, ServiceConfig, TranslationService};
pub use translator::{BatchTranslator, LeafReport};
