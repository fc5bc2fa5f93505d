//! Runtime configuration.
//!
//! Values come from an optional `kiln.toml` file overridden by `KILN_*`
//! environment variables, with safe fallbacks; nothing here panics on bad
//! input.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `KILN_MODELS_DIR` | `models` | Root directory scanned for model dirs |
//! | `KILN_HISTORY_DIR` | `history` | Transcript store directory |
//! | `KILN_SOCKET_PATH` | platform default | IPC socket / pipe name |
//! | `KILN_MAX_NEW_TOKENS` | 150 | Generation cap per chat request |
//! | `KILN_N_CTX` | 2048 | GGUF context window size |
//! | `KILN_N_THREADS` | 0 | Inference threads (0 = auto) |
//! | `KILN_FRAME_LIMIT` | 16777216 | Max IPC frame size (bytes) |
//! | `KILN_MAX_CONNECTIONS` | 64 | Max concurrent IPC connections |
//! | `KILN_LOG_LEVEL` | `info` | Tracing filter directive |
//! | `KILN_LOG_FORMAT` | `pretty` | `pretty` or `json` |
//! | `KILN_LOG_FILE` | unset | Extra JSON log sink |

use std::path::PathBuf;

use serde::Deserialize;

use crate::engine::gguf::GgufConfig;
use crate::engine::GenerationConfig;
use crate::telemetry::{LogConfig, LogFormat};

/// Default socket path for IPC communication.
#[cfg(unix)]
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/kiln.sock";

#[cfg(windows)]
pub const DEFAULT_SOCKET_PATH: &str = r"\\.\pipe\kiln";

/// All runtime configuration after file + env merging.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub models_dir: PathBuf,
    pub history_dir: PathBuf,
    pub socket_path: String,
    pub generation: GenerationConfig,
    pub gguf: GgufConfig,
    pub frame_limit: usize,
    pub max_connections: usize,
    pub log: LogConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            history_dir: PathBuf::from("history"),
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            generation: GenerationConfig::default(),
            gguf: GgufConfig::default(),
            frame_limit: 16 * 1024 * 1024,
            max_connections: 64,
            log: LogConfig::default(),
        }
    }
}

/// Schema of the optional `kiln.toml` file. Every field is optional; env
/// variables override whatever the file sets.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    models_dir: Option<PathBuf>,
    history_dir: Option<PathBuf>,
    socket_path: Option<String>,
    max_new_tokens: Option<usize>,
    n_ctx: Option<u32>,
    n_threads: Option<u32>,
    frame_limit: Option<usize>,
    max_connections: Option<usize>,
    log_level: Option<String>,
    log_format: Option<String>,
    log_file: Option<PathBuf>,
}

fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

fn read_file_config(path: &std::path::Path) -> FileConfig {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return FileConfig::default();
    };
    match toml::from_str(&raw) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            FileConfig::default()
        }
    }
}

/// Load configuration: defaults, then `kiln.toml` (if present in the working
/// directory or at `KILN_CONFIG`), then `KILN_*` env overrides.
pub fn load() -> EnvConfig {
    let file_path = std::env::var("KILN_CONFIG").unwrap_or_else(|_| "kiln.toml".to_string());
    let file = read_file_config(std::path::Path::new(&file_path));
    let defaults = EnvConfig::default();

    let models_dir = std::env::var("KILN_MODELS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| file.models_dir.unwrap_or(defaults.models_dir));
    let history_dir = std::env::var("KILN_HISTORY_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| file.history_dir.unwrap_or(defaults.history_dir));
    let socket_path = std::env::var("KILN_SOCKET_PATH")
        .unwrap_or_else(|_| file.socket_path.unwrap_or(defaults.socket_path));

    let max_new_tokens =
        parse_usize("KILN_MAX_NEW_TOKENS", file.max_new_tokens.unwrap_or(150)).max(1);
    let n_ctx = parse_u32("KILN_N_CTX", file.n_ctx.unwrap_or(2048)).max(128);
    let n_threads = parse_u32("KILN_N_THREADS", file.n_threads.unwrap_or(0));

    let frame_limit = parse_usize(
        "KILN_FRAME_LIMIT",
        file.frame_limit.unwrap_or(defaults.frame_limit),
    )
    .max(4096);
    let max_connections = parse_usize(
        "KILN_MAX_CONNECTIONS",
        file.max_connections.unwrap_or(defaults.max_connections),
    )
    .max(1);

    let level = std::env::var("KILN_LOG_LEVEL")
        .unwrap_or_else(|_| file.log_level.unwrap_or_else(|| "info".to_string()));
    let format = std::env::var("KILN_LOG_FORMAT")
        .ok()
        .or(file.log_format)
        .and_then(|s| s.parse::<LogFormat>().ok())
        .unwrap_or_default();
    let log_file = std::env::var("KILN_LOG_FILE").map(PathBuf::from).ok().or(file.log_file);

    EnvConfig {
        models_dir,
        history_dir,
        socket_path,
        generation: GenerationConfig { max_new_tokens, ..GenerationConfig::default() },
        gguf: GgufConfig { n_ctx, n_threads },
        frame_limit,
        max_connections,
        log: LogConfig { format, level, file: log_file },
    }
}

/// Socket path from environment or the platform default, for CLI clients
/// that do not need the full config.
pub fn socket_path() -> String {
    std::env::var("KILN_SOCKET_PATH").unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_string())
}
