//! Shared test fixtures: a stub loader/model pair at the `ModelLoader` seam.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kiln::engine::gguf::GgufConfig;
use kiln::engine::{EngineError, GenerationConfig, GenerationOutput, ResolvedDevice, TextModel};
use kiln::models::{ModelLoader, ModelManager};
use tempfile::TempDir;

/// Canned model: replies "pong" regardless of prompt, with a small nonzero
/// elapsed so throughput math is exercised.
pub struct StubModel;

impl TextModel for StubModel {
    fn generate(&self, _prompt: &str, config: &GenerationConfig) -> Result<GenerationOutput, EngineError> {
        config.validate()?;
        Ok(GenerationOutput {
            text: "pong".to_string(),
            tokens_generated: 1.min(config.max_new_tokens),
            elapsed: Duration::from_millis(5),
        })
    }

    fn format(&self) -> &'static str {
        "stub"
    }
}

/// Counts executed loads; can be slowed down or made to fail.
pub struct StubLoader {
    loads: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl StubLoader {
    pub fn new() -> Self {
        Self { loads: AtomicUsize::new(0), delay: Duration::ZERO, fail: false }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay, ..Self::new() }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::new() }
    }

    /// Number of loads that actually executed (cache hits excluded).
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for StubLoader {
    fn load(&self, _dir: &Path, _device: ResolvedDevice) -> Result<Arc<dyn TextModel>, EngineError> {
        if self.delay > Duration::ZERO {
            std::thread::sleep(self.delay);
        }
        if self.fail {
            return Err(EngineError::Model("stub load failure".into()));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubModel))
    }
}

/// A temp models root with one empty subdirectory per name.
pub fn models_root(models: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for name in models {
        std::fs::create_dir(dir.path().join(name)).expect("model dir");
    }
    dir
}

pub fn manager_with(root: &TempDir, loader: Arc<StubLoader>) -> ModelManager {
    ModelManager::new(root.path().to_path_buf(), loader)
}

/// Production loader wired to real backends; used where format detection
/// itself is under test.
pub fn artifact_manager(root: &TempDir) -> ModelManager {
    ModelManager::new(
        root.path().to_path_buf(),
        Arc::new(kiln::models::ArtifactLoader::new(GgufConfig::default())),
    )
}
