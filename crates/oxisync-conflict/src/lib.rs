//! OxiSync Conflict - Divergence handling
//!
//! Provides:
//! - Classification of scan candidates (one-way, converged, divergent)
//! - Glob-based resolution policies with a configurable default strategy
//! - Conflict-copy naming for keep-both resolutions
//! - Planning of the ordered actions that settle a path
//! - A durable registry of open conflicts backed by the state store

pub mod detector;
pub mod error;
pub mod namer;
pub mod policy;
pub mod registry;
pub mod resolver;

pub use detector::{Classification, ConflictDetector};
pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use policy::{PolicyEngine, Strategy};
pub use registry::ConflictRegistry;
pub use resolver::{ConflictResolver, Decision};
