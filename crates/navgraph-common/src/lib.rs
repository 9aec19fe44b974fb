//! Common utilities and data structures shared by the navgraph crates

mod bounds;
mod geometry;
mod math;
mod mesh;

pub use bounds::*;
pub use geometry::*;
pub use math::*;
pub use mesh::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid area: {0}")]
    InvalidArea(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("navigation graph is not ready (state: {0})")]
    GraphNotReady(String),

    #[error("navigation graph is busy (state: {0})")]
    GraphBusy(String),

    #[error("unknown agent type: {0}")]
    UnknownAgentType(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("navigation graph build failed: {0}")]
    Build(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("stored graph hash {stored} does not match {expected}")]
    StaleGraph { stored: String, expected: String },

    #[error("graph has no geometry source attached")]
    NoGeometrySource,

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for navgraph operations
pub type Result<T> = std::result::Result<T, Error>;
