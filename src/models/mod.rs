//! Model residency management.
//!
//! Owns the table of resident (model, device mode) handles and the discovery,
//! acquire, release, and status operations around it.

mod loader;
mod registry;

pub use loader::{detect_format, ArtifactFormat, ArtifactLoader, ModelLoader};
pub use registry::{Acquired, ModelManager, ResidencyError, ResidencyKey};
