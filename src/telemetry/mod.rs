//! Telemetry: logging setup and metric names.

mod logging;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};

/// Counter: successful model loads (cache hits excluded).
pub const METRIC_LOADS: &str = "kiln_model_loads_total";
/// Counter: unloads that actually removed a resident model.
pub const METRIC_UNLOADS: &str = "kiln_model_unloads_total";
/// Counter: completed generation calls.
pub const METRIC_GENERATIONS: &str = "kiln_generations_total";
/// Histogram: wall-clock seconds spent loading a model.
pub const METRIC_LOAD_SECONDS: &str = "kiln_model_load_seconds";
/// Histogram: wall-clock seconds per generation call.
pub const METRIC_GENERATE_SECONDS: &str = "kiln_generate_seconds";
