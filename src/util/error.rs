//! Error types for the path tracer.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for scene, settings and GPU setup operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A fixed-size buffer would overflow.
    #[error("Capacity exceeded for {what}: requested {requested}, capacity {capacity}")]
    CapacityExceeded {
        what: &'static str,
        requested: usize,
        capacity: usize,
    },

    /// Replacement data does not match the shape it replaces.
    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Instance without triangles handed to the mesh path.
    #[error("Instance has no triangles")]
    EmptyInstance,

    /// Index pointing outside the array it refers to.
    #[error("Invalid {what} index {index} (count: {count})")]
    InvalidIndex {
        what: &'static str,
        index: i64,
        count: usize,
    },

    /// Operation requires a mesh instance.
    #[error("Geom {0} is not a mesh instance")]
    NotAMesh(usize),

    /// Scene bookkeeping no longer matches its arrays.
    #[error("Inconsistent scene: {0}")]
    Inconsistent(String),

    /// Settings failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Settings file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Unresolved or unknown placeholder in shader source.
    #[error("Shader assembly failed: {0}")]
    Shader(String),

    /// Device or resource acquisition failure.
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Mapping a readback buffer failed.
    #[error("Readback failed: {0}")]
    Readback(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a capacity error.
    pub fn capacity(what: &'static str, requested: usize, capacity: usize) -> Self {
        Self::CapacityExceeded {
            what,
            requested,
            capacity,
        }
    }

    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an inconsistency error.
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }
}

/// Result type alias for path tracer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::capacity("triangles", 12, 10);
        let s = e.to_string();
        assert!(s.contains("triangles"));
        assert!(s.contains("12"));
        assert!(s.contains("10"));

        let e = Error::InvalidIndex {
            what: "vertex",
            index: -3,
            count: 4,
        };
        assert!(e.to_string().contains("-3"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
