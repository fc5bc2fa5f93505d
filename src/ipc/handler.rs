//! Request dispatch: bytes in, bytes out.
//!
//! The handler is the only component that talks to both the residency
//! manager and the transcript store. Residency errors are folded into
//! protocol error responses with codes mirroring the usual HTTP meanings:
//! 400 bad argument / not loaded, 404 unknown model, 500 load or backend
//! failure.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::protocol::{self, Request, Response};
use crate::engine::{DeviceMode, GenerationConfig};
use crate::history::{Sender, TranscriptRecord, TranscriptStore};
use crate::models::{ModelManager, ResidencyError};
use crate::telemetry::{METRIC_GENERATE_SECONDS, METRIC_GENERATIONS};

/// Handles decoded requests against the manager and transcript store.
pub struct ChatHandler {
    manager: Arc<ModelManager>,
    transcripts: Arc<TranscriptStore>,
    generation: GenerationConfig,
}

impl ChatHandler {
    pub fn new(
        manager: Arc<ModelManager>,
        transcripts: Arc<TranscriptStore>,
        generation: GenerationConfig,
    ) -> Self {
        Self { manager, transcripts, generation }
    }

    /// Process one raw frame and produce the raw response frame.
    ///
    /// Never fails: malformed input becomes an error response, and an
    /// unencodable response degrades to a static JSON error.
    pub async fn process(&self, bytes: &[u8]) -> Vec<u8> {
        let response = match protocol::decode_request(bytes) {
            Ok(request) => self.handle(request).await,
            Err(e) => Response::error(400, e.to_string()),
        };
        protocol::encode_response(&response).unwrap_or_else(|_| {
            br#"{"type":"error","code":500,"message":"response encoding failed"}"#.to_vec()
        })
    }

    async fn handle(&self, request: Request) -> Response {
        if let Err(e) = request.validate() {
            return Response::error(400, e.to_string());
        }
        match request {
            Request::Load { model, device } => self.handle_load(model, device).await,
            Request::Unload { model, device } => self.handle_unload(model, device),
            Request::Chat { chat_id, model, device, message } => {
                self.handle_chat(chat_id, model, device, message).await
            }
            Request::Status => self.handle_status(),
            Request::Models => self.handle_models(),
            Request::Chats => match self.transcripts.list_chats() {
                Ok(chats) => Response::Chats { chats },
                Err(e) => Response::error(500, e.to_string()),
            },
            Request::History { chat_id } => match self.transcripts.history(&chat_id) {
                Ok(messages) => Response::History { messages },
                Err(e) => Response::error(500, e.to_string()),
            },
            Request::ClearHistory => match self.transcripts.clear_all() {
                Ok(removed) => Response::HistoryCleared { removed },
                Err(e) => Response::error(500, e.to_string()),
            },
        }
    }

    async fn handle_load(&self, model: String, device: String) -> Response {
        let mode = match parse_mode(&device) {
            Ok(mode) => mode,
            Err(resp) => return resp,
        };
        match self.manager.acquire(&model, mode).await {
            Ok(acquired) => Response::Loaded {
                model,
                device,
                resolved_device: acquired.resolved.to_string(),
                load_time_s: acquired.elapsed.as_secs_f64(),
                cache_hit: acquired.cache_hit,
            },
            Err(e) => {
                tracing::error!(model = %model, device = %device, error = %e, "load failed");
                residency_error(e)
            }
        }
    }

    fn handle_unload(&self, model: String, device: String) -> Response {
        let mode = match parse_mode(&device) {
            Ok(mode) => mode,
            Err(resp) => return resp,
        };
        let unloaded = self.manager.release(&model, mode);
        Response::Unloaded { model, device, unloaded }
    }

    async fn handle_chat(
        &self,
        chat_id: Option<String>,
        model: String,
        device: String,
        message: String,
    ) -> Response {
        let mode = match parse_mode(&device) {
            Ok(mode) => mode,
            Err(resp) => return resp,
        };
        // Chat never loads implicitly; the key must already be resident.
        let handle = match self.manager.lookup(&model, mode) {
            Ok(handle) => handle,
            Err(e) => return residency_error(e),
        };

        let chat_id = chat_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let user_record = TranscriptRecord {
            chat_id: chat_id.clone(),
            sender: Sender::User,
            text: message.clone(),
            model: model.clone(),
            device: device.clone(),
            timestamp: Utc::now(),
            tokens: None,
            time_s: None,
            tps: None,
        };
        if let Err(e) = self.transcripts.append(&user_record) {
            tracing::warn!(chat_id = %chat_id, error = %e, "failed to persist user message");
        }

        let config = self.generation.clone();
        let prompt = message;
        let result =
            tokio::task::spawn_blocking(move || handle.generate(&prompt, &config)).await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(chat_id = %chat_id, error = %e, "generation failed");
                return Response::error(500, e.to_string());
            }
            Err(e) => {
                tracing::error!(chat_id = %chat_id, error = %e, "generation task failed");
                return Response::error(500, "generation task failed");
            }
        };

        metrics::counter!(METRIC_GENERATIONS).increment(1);
        metrics::histogram!(METRIC_GENERATE_SECONDS).record(output.elapsed.as_secs_f64());

        let tps = output.tokens_per_second();
        let time_s = output.elapsed.as_secs_f64();
        let assistant_record = TranscriptRecord {
            chat_id: chat_id.clone(),
            sender: Sender::Assistant,
            text: output.text.clone(),
            model,
            device,
            timestamp: Utc::now(),
            tokens: Some(output.tokens_generated),
            time_s: Some(time_s),
            tps: Some(tps),
        };
        if let Err(e) = self.transcripts.append(&assistant_record) {
            tracing::warn!(chat_id = %chat_id, error = %e, "failed to persist reply");
        }

        Response::ChatReply {
            chat_id,
            response: output.text,
            tokens: output.tokens_generated,
            time_s,
            tps,
        }
    }

    fn handle_status(&self) -> Response {
        match self.manager.status() {
            Some(key) => Response::StatusReport {
                loaded: true,
                model: Some(key.model),
                device: Some(key.device.to_string()),
            },
            None => Response::StatusReport { loaded: false, model: None, device: None },
        }
    }

    fn handle_models(&self) -> Response {
        match self.manager.list_available_models() {
            Ok(models) => Response::Models { models },
            Err(e) => Response::error(500, e.to_string()),
        }
    }
}

fn parse_mode(device: &str) -> Result<DeviceMode, Response> {
    device
        .parse::<DeviceMode>()
        .map_err(|bad| residency_error(ResidencyError::InvalidDeviceMode(bad)))
}

fn residency_error(e: ResidencyError) -> Response {
    let code = match &e {
        ResidencyError::NotFound(_) => 404,
        ResidencyError::InvalidDeviceMode(_) | ResidencyError::NotResident(_) => 400,
        ResidencyError::LoadFailure { .. } | ResidencyError::Io(_) => 500,
    };
    Response::Error { code, message: e.to_string() }
}
