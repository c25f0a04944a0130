use serde::{Deserialize, Serialize};

/// One bounded piece of page markup sent to the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub id: usize,
    pub html: String,
}

impl TranslationUnit {
    pub fn new(id: usize, html: impl Into<String>) -> Self {
        Self {
            id,
            html: html.into(),
        }
    }
}

/// Content-side bookkeeping for a unit: which element it came from and where
/// it sits among that element's chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceUnit {
    pub unit: TranslationUnit,
    pub element_index: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultItem {
    pub id: usize,
    pub translated_html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResultItem {
    pub fn ok(id: usize, translated_html: impl Into<String>) -> Self {
        Self {
            id,
            translated_html: translated_html.into(),
            error: None,
        }
    }

    pub fn failed(id: usize, error: impl Into<String>) -> Self {
        Self {
            id,
            translated_html: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Position of a bisected sub-batch relative to its parent (1-based index).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubBatchTag {
    pub index: usize,
    pub count: usize,
    pub size: usize,
}
