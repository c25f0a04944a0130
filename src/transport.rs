//! JSON messages exchanged between the content side and the background side,
//! and the in-process port that carries them.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{BatchResultItem, SubBatchTag, TranslationUnit};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed unexpectedly")]
    Disconnected,

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    #[serde(rename = "startHTMLTranslation", rename_all = "camelCase")]
    StartHtmlTranslation {
        request_id: String,
        units: Vec<TranslationUnit>,
        target_language: String,
    },
    #[serde(rename = "cancelHTMLTranslation", rename_all = "camelCase")]
    CancelHtmlTranslation { request_id: String },
}

impl ClientMessage {
    pub fn request_id(&self) -> &str {
        match self {
            ClientMessage::StartHtmlTranslation { request_id, .. } => request_id,
            ClientMessage::CancelHtmlTranslation { request_id } => request_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ServerMessage {
    #[serde(rename = "htmlTranslationResult")]
    HtmlTranslationResult(TranslationResultMessage),
}

/// One progress report (`done: false`) or the terminal message (`done: true`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResultMessage {
    pub request_id: String,
    #[serde(default)]
    pub results: Vec<BatchResultItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_batch_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_batch_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_batch_size: Option<usize>,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranslationResultMessage {
    pub fn progress(
        request_id: &str,
        results: Vec<BatchResultItem>,
        batch_index: usize,
        batch_count: usize,
        batch_size: usize,
        tag: Option<SubBatchTag>,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            results,
            batch_index: Some(batch_index),
            batch_count: Some(batch_count),
            batch_size: Some(batch_size),
            sub_batch_index: tag.map(|t| t.index),
            sub_batch_count: tag.map(|t| t.count),
            sub_batch_size: tag.map(|t| t.size),
            done: false,
            error: None,
        }
    }

    pub fn done(request_id: &str, error: Option<String>) -> Self {
        Self {
            request_id: request_id.to_string(),
            done: true,
            error,
            ..Self::default()
        }
    }

    pub fn sub_batch(&self) -> Option<SubBatchTag> {
        Some(SubBatchTag {
            index: self.sub_batch_index?,
            count: self.sub_batch_count?,
            size: self.sub_batch_size?,
        })
    }
}

/// One end of a long-lived bidirectional channel. Messages travel as JSON
/// text, so each side only ever sees plain data.
pub struct Port {
    tx: Sender<String>,
    rx: Receiver<String>,
}

/// Returns `(content_end, background_end)`.
pub fn port_pair() -> (Port, Port) {
    let (to_background, from_content) = mpsc::channel();
    let (to_content, from_background) = mpsc::channel();
    (
        Port {
            tx: to_background,
            rx: from_background,
        },
        Port {
            tx: to_content,
            rx: from_content,
        },
    )
}

impl Port {
    pub fn send<T: Serialize>(&self, msg: &T) -> Result<(), TransportError> {
        let text = serde_json::to_string(msg)?;
        self.tx.send(text).map_err(|_| TransportError::Disconnected)
    }

    pub fn recv<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        let text = self.rx.recv().map_err(|_| TransportError::Disconnected)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// `Ok(None)` when nothing is queued.
    pub fn try_recv<T: DeserializeOwned>(&self) -> Result<Option<T>, TransportError> {
        match self.rx.try_recv() {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    pub fn recv_timeout<T: DeserializeOwned>(
        &self,
        timeout: Duration,
    ) -> Result<Option<T>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}
