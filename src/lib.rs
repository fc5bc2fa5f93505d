//! Kiln Runtime
//!
//! An offline chat runtime built around one idea: models are expensive to
//! load, so a residency manager decides which (model, device) pairs stay in
//! memory and serializes load/unload against concurrent use.
//!
//! # Components
//!
//! - **Residency manager** ([`models`]): the table of resident handles and
//!   the discover/acquire/release/status operations around it
//! - **Engine** ([`engine`]): device resolution and the two backend paths
//!   (pre-quantized GGUF, framework safetensors) behind one trait
//! - **Transcripts** ([`history`]): append-only conversation records
//! - **IPC** ([`ipc`]): the only external interface - named pipes / Unix
//!   sockets carrying length-prefixed JSON
//!
//! Residency does not survive a restart; the table starts empty and lives
//! exactly as long as the process.

pub mod config;
pub mod engine;
pub mod history;
pub mod ipc;
pub mod models;
pub mod telemetry;

use std::sync::Arc;

use config::EnvConfig;
use history::TranscriptStore;
use ipc::{ChatHandler, ServerConfig};
use models::{ArtifactLoader, ModelManager};

/// The assembled runtime: every long-lived component wired once at startup
/// and shared for the life of the process.
pub struct Runtime {
    pub manager: Arc<ModelManager>,
    pub transcripts: Arc<TranscriptStore>,
    pub handler: Arc<ChatHandler>,
    server: ServerConfig,
}

impl Runtime {
    /// Wire the manager, transcript store, and request handler from config.
    pub fn new(config: &EnvConfig) -> Self {
        let loader = Arc::new(ArtifactLoader::new(config.gguf.clone()));
        let manager = Arc::new(ModelManager::new(config.models_dir.clone(), loader));
        let transcripts = Arc::new(TranscriptStore::new(config.history_dir.clone()));
        let handler = Arc::new(ChatHandler::new(
            Arc::clone(&manager),
            Arc::clone(&transcripts),
            config.generation.clone(),
        ));
        let server = ServerConfig {
            socket_path: config.socket_path.clone(),
            frame_limit: config.frame_limit,
            max_connections: config.max_connections,
        };
        Self { manager, transcripts, handler, server }
    }

    /// Serve IPC requests until a shutdown signal arrives.
    pub async fn serve(&self) -> std::io::Result<()> {
        ipc::run_server(Arc::clone(&self.handler), self.server.clone()).await
    }
}
