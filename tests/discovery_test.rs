//! Discovery and artifact format detection.

mod common;

use std::path::Path;
use std::sync::Arc;

use common::{manager_with, models_root, StubLoader};
use kiln::engine::DeviceMode;
use kiln::models::{detect_format, ArtifactFormat, ModelManager, ResidencyError};

#[test]
fn missing_root_yields_empty_listing() {
    let manager = ModelManager::new(
        Path::new("/nonexistent/kiln-models").to_path_buf(),
        Arc::new(StubLoader::new()),
    );
    let models = manager.list_available_models().unwrap();
    assert!(models.is_empty());
}

#[test]
fn only_subdirectories_are_models() {
    let root = models_root(&["gpt2", "tiny-gguf"]);
    std::fs::write(root.path().join("README.md"), b"not a model").unwrap();
    let manager = manager_with(&root, Arc::new(StubLoader::new()));

    let mut models = manager.list_available_models().unwrap();
    models.sort();
    assert_eq!(models, vec!["gpt2".to_string(), "tiny-gguf".to_string()]);
}

#[tokio::test]
async fn mixed_root_scenario() {
    // Root holds a framework-format dir and a pre-quantized dir.
    let root = models_root(&["gpt2", "tiny-gguf"]);
    std::fs::write(root.path().join("gpt2").join("config.json"), b"{}").unwrap();
    std::fs::write(root.path().join("tiny-gguf").join("weights.gguf"), b"gguf-bytes").unwrap();

    let manager = manager_with(&root, Arc::new(StubLoader::new()));

    let mut models = manager.list_available_models().unwrap();
    models.sort();
    assert_eq!(models, vec!["gpt2".to_string(), "tiny-gguf".to_string()]);

    // Both directories acquire through the same seam regardless of format.
    assert!(manager.acquire("gpt2", DeviceMode::Cpu).await.is_ok());
    assert!(manager.acquire("tiny-gguf", DeviceMode::Cpu).await.is_ok());

    // And the formats route to the expected paths.
    assert_eq!(
        detect_format(&root.path().join("gpt2")).unwrap(),
        ArtifactFormat::Framework
    );
    assert!(matches!(
        detect_format(&root.path().join("tiny-gguf")).unwrap(),
        ArtifactFormat::Gguf(p) if p.ends_with("weights.gguf")
    ));

    let err = manager.acquire("missing", DeviceMode::Cpu).await.unwrap_err();
    assert!(matches!(err, ResidencyError::NotFound(_)));
}

#[test]
fn listing_is_safe_to_call_repeatedly() {
    let root = models_root(&[]);
    let manager = manager_with(&root, Arc::new(StubLoader::new()));
    assert!(manager.list_available_models().unwrap().is_empty());
    assert!(manager.list_available_models().unwrap().is_empty());
}
