//! Residency manager behavior: idempotent acquire, no-op release, fresh
//! reload after release, single-flight under racing acquires.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{manager_with, models_root, StubLoader};
use kiln::engine::DeviceMode;
use kiln::models::ResidencyError;

#[tokio::test]
async fn repeated_acquire_returns_the_same_handle() {
    let root = models_root(&["gpt2"]);
    let loader = Arc::new(StubLoader::new());
    let manager = manager_with(&root, Arc::clone(&loader));

    let first = manager.acquire("gpt2", DeviceMode::Cpu).await.unwrap();
    let second = manager.acquire("gpt2", DeviceMode::Cpu).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert!(Arc::ptr_eq(&first.handle, &second.handle), "second acquire must be the cached handle");
    assert_eq!(loader.load_count(), 1, "only one load may execute");
}

#[tokio::test]
async fn requested_mode_is_the_key_not_the_resolved_device() {
    let root = models_root(&["gpt2"]);
    let loader = Arc::new(StubLoader::new());
    let manager = manager_with(&root, Arc::clone(&loader));

    // Without accelerator features both resolve to the same physical device,
    // but the requested strings differ, so these are two residents.
    manager.acquire("gpt2", DeviceMode::Auto).await.unwrap();
    manager.acquire("gpt2", DeviceMode::Cpu).await.unwrap();

    assert_eq!(loader.load_count(), 2);
    assert_eq!(manager.resident_count(), 2);
}

#[tokio::test]
async fn release_of_absent_key_is_a_noop() {
    let root = models_root(&["gpt2"]);
    let manager = manager_with(&root, Arc::new(StubLoader::new()));

    assert!(!manager.release("gpt2", DeviceMode::Cpu));
    assert!(manager.status().is_none());
}

#[tokio::test]
async fn release_then_acquire_loads_fresh() {
    let root = models_root(&["gpt2"]);
    let loader = Arc::new(StubLoader::new());
    let manager = manager_with(&root, Arc::clone(&loader));

    manager.acquire("gpt2", DeviceMode::Cpu).await.unwrap();
    assert!(manager.release("gpt2", DeviceMode::Cpu));
    assert!(manager.status().is_none(), "released key must be gone from status");
    assert!(manager.lookup("gpt2", DeviceMode::Cpu).is_err());

    let again = manager.acquire("gpt2", DeviceMode::Cpu).await.unwrap();
    assert!(!again.cache_hit, "reload after release must not be a cache hit");
    assert_eq!(loader.load_count(), 2);
}

#[tokio::test]
async fn repeated_release_reports_nothing_unloaded() {
    let root = models_root(&["gpt2"]);
    let manager = manager_with(&root, Arc::new(StubLoader::new()));

    manager.acquire("gpt2", DeviceMode::Cpu).await.unwrap();
    assert!(manager.release("gpt2", DeviceMode::Cpu));
    assert!(!manager.release("gpt2", DeviceMode::Cpu));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_acquires_execute_exactly_one_load() {
    let root = models_root(&["gpt2"]);
    let loader = Arc::new(StubLoader::slow(Duration::from_millis(100)));
    let manager = Arc::new(manager_with(&root, Arc::clone(&loader)));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.acquire("gpt2", DeviceMode::Cpu).await.unwrap() })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().handle);
    }

    assert_eq!(loader.load_count(), 1, "losers must observe the winner's load");
    for handle in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], handle));
    }
}

#[tokio::test]
async fn unknown_model_fails_with_not_found() {
    let root = models_root(&["gpt2"]);
    let manager = manager_with(&root, Arc::new(StubLoader::new()));

    let err = manager.acquire("missing", DeviceMode::Cpu).await.unwrap_err();
    assert!(matches!(err, ResidencyError::NotFound(name) if name == "missing"));
    assert_eq!(manager.resident_count(), 0);
}

#[tokio::test]
async fn failed_load_inserts_nothing() {
    let root = models_root(&["gpt2"]);
    let manager = manager_with(&root, Arc::new(StubLoader::failing()));

    let err = manager.acquire("gpt2", DeviceMode::Cpu).await.unwrap_err();
    assert!(matches!(err, ResidencyError::LoadFailure { .. }));
    assert!(manager.status().is_none());
    assert_eq!(manager.resident_count(), 0);

    // The failure must not poison the key either.
    assert!(manager.lookup("gpt2", DeviceMode::Cpu).is_err());
}

#[tokio::test]
async fn status_tracks_most_recent_resident_key() {
    let root = models_root(&["alpha", "beta"]);
    let manager = manager_with(&root, Arc::new(StubLoader::new()));

    manager.acquire("alpha", DeviceMode::Cpu).await.unwrap();
    manager.acquire("beta", DeviceMode::Cpu).await.unwrap();
    assert_eq!(manager.status().unwrap().model, "beta");

    // Unloading the newest falls back to the previous resident.
    manager.release("beta", DeviceMode::Cpu);
    assert_eq!(manager.status().unwrap().model, "alpha");
}

#[tokio::test]
async fn in_flight_handle_outlives_release() {
    let root = models_root(&["gpt2"]);
    let manager = manager_with(&root, Arc::new(StubLoader::new()));

    manager.acquire("gpt2", DeviceMode::Cpu).await.unwrap();
    let borrowed = manager.lookup("gpt2", DeviceMode::Cpu).unwrap();

    assert!(manager.release("gpt2", DeviceMode::Cpu));

    // A generation that had already borrowed the handle finishes normally.
    let out = borrowed.generate("hello", &Default::default()).unwrap();
    assert_eq!(out.text, "pong");
}

#[tokio::test]
async fn traversal_shaped_identifiers_are_unknown_models() {
    let root = models_root(&["gpt2"]);
    let manager = manager_with(&root, Arc::new(StubLoader::new()));

    for bad in ["../gpt2", "a/b", ""] {
        let err = manager.acquire(bad, DeviceMode::Cpu).await.unwrap_err();
        assert!(matches!(err, ResidencyError::NotFound(_)), "{bad:?} must be NotFound");
    }
}
