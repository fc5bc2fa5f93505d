//! Wire format for the Kiln IPC protocol.
//!
//! Requests and responses are JSON objects tagged with a `type` field,
//! carried in length-prefixed frames. Size limits are enforced before
//! parsing so an oversized frame can never trigger a large allocation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::{ChatMeta, TranscriptRecord};

/// Hard ceiling on a single encoded message.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

fn default_device() -> String {
    "auto".to_string()
}

/// Client-to-server messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Load a model onto a device and keep it resident.
    Load {
        model: String,
        #[serde(default = "default_device")]
        device: String,
    },

    /// Unload a previously loaded model.
    Unload {
        model: String,
        #[serde(default = "default_device")]
        device: String,
    },

    /// Generate a reply within a conversation. Never loads implicitly; the
    /// (model, device) key must already be resident.
    Chat {
        #[serde(default)]
        chat_id: Option<String>,
        model: String,
        #[serde(default = "default_device")]
        device: String,
        message: String,
    },

    /// Is anything resident right now, and which key.
    Status,

    /// Discovery: names under the models root.
    Models,

    /// Known conversations with display titles.
    Chats,

    /// Full transcript of one conversation.
    History { chat_id: String },

    /// Delete every persisted conversation.
    ClearHistory,
}

impl Request {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Request::Load { model, .. } | Request::Unload { model, .. } => {
                if model.is_empty() {
                    return Err(ProtocolError::MissingField("model".into()));
                }
            }
            Request::Chat { model, message, .. } => {
                if model.is_empty() {
                    return Err(ProtocolError::MissingField("model".into()));
                }
                if message.is_empty() {
                    return Err(ProtocolError::MissingField("message".into()));
                }
            }
            Request::History { chat_id } => {
                if chat_id.is_empty() {
                    return Err(ProtocolError::MissingField("chat_id".into()));
                }
            }
            Request::Status | Request::Models | Request::Chats | Request::ClearHistory => {}
        }
        Ok(())
    }
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Loaded {
        model: String,
        device: String,
        /// Physical device the load resolved to (may differ from `device`).
        resolved_device: String,
        load_time_s: f64,
        /// True when the key was already resident and no load executed.
        cache_hit: bool,
    },

    Unloaded {
        model: String,
        device: String,
        /// False when the key was not resident (a no-op, not an error).
        unloaded: bool,
    },

    ChatReply {
        chat_id: String,
        response: String,
        tokens: usize,
        time_s: f64,
        tps: f64,
    },

    StatusReport {
        loaded: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
    },

    Models { models: Vec<String> },

    Chats { chats: Vec<ChatMeta> },

    History { messages: Vec<TranscriptRecord> },

    HistoryCleared { removed: usize },

    Error { code: u16, message: String },
}

impl Response {
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Response::Error { code, message: message.into() }
    }
}

/// Encode a request with the size limit enforced.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(request)?;
    check_size(bytes.len())?;
    Ok(bytes)
}

/// Decode a request; the size check runs before parsing.
pub fn decode_request(bytes: &[u8]) -> Result<Request, ProtocolError> {
    check_size(bytes.len())?;
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a response. An oversized response degrades to an error message
/// rather than shipping an unbounded frame.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(response)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        let fallback = Response::error(
            413,
            format!("response too large: {} bytes (max {})", bytes.len(), MAX_MESSAGE_SIZE),
        );
        return Ok(serde_json::to_vec(&fallback)?);
    }
    Ok(bytes)
}

/// Decode a response; the size check runs before parsing.
pub fn decode_response(bytes: &[u8]) -> Result<Response, ProtocolError> {
    check_size(bytes.len())?;
    Ok(serde_json::from_slice(bytes)?)
}

fn check_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge { size, max: MAX_MESSAGE_SIZE });
    }
    Ok(())
}
