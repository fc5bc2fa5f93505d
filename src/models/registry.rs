//! The residency table: which (model, device mode) pairs are loaded.
//!
//! `ModelManager` is the single owner of every resident handle. It is
//! constructed once at startup and shared behind an `Arc`; all mutation goes
//! through it. Callers of [`ModelManager::lookup`] receive a clone of the
//! handle that is valid for one generation call - release never cancels an
//! in-flight generation, it only guarantees the table stops handing the
//! handle out, and backend teardown happens when the last clone drops.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::loader::ModelLoader;
use crate::engine::{device, DeviceMode, EngineError, ResolvedDevice, TextModel};
use crate::telemetry::{METRIC_LOADS, METRIC_LOAD_SECONDS, METRIC_UNLOADS};

/// Identity of one resident model: the identifier plus the *requested*
/// device mode. The resolved physical device is intentionally not part of
/// the key - a client must release with the same mode string it loaded with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResidencyKey {
    pub model: String,
    pub device: DeviceMode,
}

impl ResidencyKey {
    pub fn new(model: impl Into<String>, device: DeviceMode) -> Self {
        Self { model: model.into(), device }
    }
}

impl fmt::Display for ResidencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.model, self.device)
    }
}

/// Errors from the residency manager.
#[derive(Debug, Error)]
pub enum ResidencyError {
    #[error("model '{0}' not found under the models root")]
    NotFound(String),

    #[error("invalid device mode: '{0}' (expected auto, cpu, or gpu)")]
    InvalidDeviceMode(String),

    #[error("failed to load {key}: {source}")]
    LoadFailure {
        key: ResidencyKey,
        #[source]
        source: EngineError,
    },

    #[error("{0} is not loaded")]
    NotResident(ResidencyKey),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a successful acquire.
pub struct Acquired {
    pub handle: Arc<dyn TextModel>,
    pub resolved: ResolvedDevice,
    pub elapsed: Duration,
    /// True when the key was already resident and no load executed.
    pub cache_hit: bool,
}

impl fmt::Debug for Acquired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquired")
            .field("resolved", &self.resolved)
            .field("elapsed", &self.elapsed)
            .field("cache_hit", &self.cache_hit)
            .finish_non_exhaustive()
    }
}

struct Entry {
    handle: Arc<dyn TextModel>,
    device: ResolvedDevice,
}

#[derive(Default)]
struct Table {
    resident: HashMap<ResidencyKey, Entry>,
    /// Insertion order, so status can report the most recently loaded key
    /// still resident after arbitrary unloads.
    order: Vec<ResidencyKey>,
}

/// Owns the residency table and serializes loads against concurrent use.
pub struct ModelManager {
    models_root: PathBuf,
    loader: Arc<dyn ModelLoader>,
    /// Held across the whole check-then-load-then-insert sequence so racing
    /// acquires for any key collapse to a single executed load. Table probes
    /// never take this, only the short-lived `table` lock.
    load_gate: tokio::sync::Mutex<()>,
    table: parking_lot::Mutex<Table>,
}

impl ModelManager {
    pub fn new(models_root: PathBuf, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            models_root,
            loader,
            load_gate: tokio::sync::Mutex::new(()),
            table: parking_lot::Mutex::new(Table::default()),
        }
    }

    pub fn models_root(&self) -> &PathBuf {
        &self.models_root
    }

    /// Names of every immediate subdirectory of the models root, in
    /// directory-listing order. A missing root yields an empty list so
    /// discovery is safe before any setup has happened; any other I/O
    /// error surfaces as-is.
    pub fn list_available_models(&self) -> Result<Vec<String>, ResidencyError> {
        let entries = match std::fs::read_dir(&self.models_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(root = %self.models_root.display(), "models root not found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    /// Load a model onto a device, or return the already-resident handle.
    ///
    /// Idempotent per key: after the first success, repeated acquires are
    /// cheap cache hits. On any failure nothing is inserted and partially
    /// constructed backend state is dropped before the error propagates.
    pub async fn acquire(&self, model: &str, mode: DeviceMode) -> Result<Acquired, ResidencyError> {
        let key = ResidencyKey::new(model, mode);

        // Fast path without touching the load gate.
        if let Some(hit) = self.probe(&key) {
            return Ok(hit);
        }

        let _gate = self.load_gate.lock().await;
        // Re-check: a racing acquire may have finished while we waited.
        if let Some(hit) = self.probe(&key) {
            return Ok(hit);
        }

        let resolved = device::resolve(mode);

        let dir = self.validated_dir(model)?;
        let loader = Arc::clone(&self.loader);
        let start = Instant::now();
        let handle = tokio::task::spawn_blocking(move || loader.load(&dir, resolved))
            .await
            .map_err(|e| ResidencyError::LoadFailure {
                key: key.clone(),
                source: EngineError::Model(format!("load task failed: {e}")),
            })?
            .map_err(|source| ResidencyError::LoadFailure { key: key.clone(), source })?;
        let elapsed = start.elapsed();

        {
            let mut table = self.table.lock();
            table.resident.insert(
                key.clone(),
                Entry { handle: Arc::clone(&handle), device: resolved },
            );
            table.order.push(key.clone());
        }

        metrics::counter!(METRIC_LOADS).increment(1);
        metrics::histogram!(METRIC_LOAD_SECONDS).record(elapsed.as_secs_f64());
        tracing::info!(
            key = %key,
            resolved = %resolved,
            elapsed_s = elapsed.as_secs_f64(),
            "model loaded"
        );

        Ok(Acquired { handle, resolved, elapsed, cache_hit: false })
    }

    /// Drop a resident model and reclaim what the runtime will give back.
    ///
    /// Returns whether anything was unloaded; an absent key is a no-op, not
    /// an error. The table entry is removed before any teardown so no new
    /// generation call can observe the key, and the reclamation pass runs
    /// regardless of whether the deeper calls succeed.
    pub fn release(&self, model: &str, mode: DeviceMode) -> bool {
        let key = ResidencyKey::new(model, mode);
        let removed = {
            let mut table = self.table.lock();
            let entry = table.resident.remove(&key);
            if entry.is_some() {
                table.order.retain(|k| k != &key);
            }
            entry
        };
        match removed {
            Some(entry) => {
                let device = entry.device;
                drop(entry);
                device.release_cached_memory();
                metrics::counter!(METRIC_UNLOADS).increment(1);
                tracing::info!(key = %key, "model unloaded");
                true
            }
            None => {
                tracing::info!(key = %key, "not loaded; nothing to unload");
                false
            }
        }
    }

    /// The most recently loaded key still resident, or none.
    pub fn status(&self) -> Option<ResidencyKey> {
        self.table.lock().order.last().cloned()
    }

    /// Borrow the handle for one generation call.
    ///
    /// The returned clone stays valid even if the key is released mid-call;
    /// see the module docs for the policy.
    pub fn lookup(&self, model: &str, mode: DeviceMode) -> Result<Arc<dyn TextModel>, ResidencyError> {
        let key = ResidencyKey::new(model, mode);
        let table = self.table.lock();
        match table.resident.get(&key) {
            Some(entry) => Ok(Arc::clone(&entry.handle)),
            None => Err(ResidencyError::NotResident(key)),
        }
    }

    /// Number of resident handles.
    pub fn resident_count(&self) -> usize {
        self.table.lock().resident.len()
    }

    fn probe(&self, key: &ResidencyKey) -> Option<Acquired> {
        let table = self.table.lock();
        table.resident.get(key).map(|entry| Acquired {
            handle: Arc::clone(&entry.handle),
            resolved: entry.device,
            elapsed: Duration::ZERO,
            cache_hit: true,
        })
    }

    fn validated_dir(&self, model: &str) -> Result<PathBuf, ResidencyError> {
        // Identifiers are bare directory names; anything that could walk out
        // of the models root is treated as unknown.
        if model.is_empty() || model == ".." || model.contains(['/', '\\']) {
            return Err(ResidencyError::NotFound(model.to_string()));
        }
        let dir = self.models_root.join(model);
        if !dir.is_dir() {
            return Err(ResidencyError::NotFound(model.to_string()));
        }
        Ok(dir)
    }
}
