//! Artifact format detection and backend dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::gguf::GgufConfig;
use crate::engine::{EngineError, GgufRuntime, HfCausalModel, ResolvedDevice, TextModel};

/// What a model directory turned out to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// A pre-quantized single-file model; the first `.gguf` in listing order.
    Gguf(PathBuf),
    /// A framework-format directory (tokenizer + config + safetensors).
    Framework,
}

/// Detect the artifact format of a model directory.
///
/// Any `.gguf` file routes the whole directory through the pre-quantized
/// path; the first match in directory-listing order wins.
pub fn detect_format(dir: &Path) -> Result<ArtifactFormat, std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "gguf") {
            return Ok(ArtifactFormat::Gguf(path));
        }
    }
    Ok(ArtifactFormat::Framework)
}

/// The construction seam between the residency manager and the backends.
///
/// The manager calls `load` off the async runtime (under `spawn_blocking`)
/// with the directory already validated to exist.
pub trait ModelLoader: Send + Sync {
    fn load(&self, dir: &Path, device: ResolvedDevice) -> Result<Arc<dyn TextModel>, EngineError>;
}

/// Production loader: detects the artifact format and dispatches to the
/// matching backend path.
pub struct ArtifactLoader {
    gguf: GgufConfig,
}

impl ArtifactLoader {
    pub fn new(gguf: GgufConfig) -> Self {
        Self { gguf }
    }
}

impl Default for ArtifactLoader {
    fn default() -> Self {
        Self::new(GgufConfig::default())
    }
}

impl ModelLoader for ArtifactLoader {
    fn load(&self, dir: &Path, device: ResolvedDevice) -> Result<Arc<dyn TextModel>, EngineError> {
        match detect_format(dir)? {
            ArtifactFormat::Gguf(path) => {
                tracing::debug!(path = %path.display(), "loading pre-quantized artifact");
                let runtime = GgufRuntime::load(&path, device, &self.gguf)?;
                Ok(Arc::new(runtime))
            }
            ArtifactFormat::Framework => {
                tracing::debug!(dir = %dir.display(), "loading framework artifact");
                let model = HfCausalModel::load(dir, device)?;
                Ok(Arc::new(model))
            }
        }
    }
}
