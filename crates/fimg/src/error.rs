//! Error Module - Image Writer Error Types
//!
//! Defines the error type for all fallible image-writer operations.
//!
//! # Error Categories
//!
//! ## Resource errors
//! - `Allocation` - destination memory reservation failed
//! - `Io` - output file open/write/flush failure
//!
//! ## Validation errors
//! - `Configuration` - invalid build configuration
//! - `Validation` - internal consistency check failed during serialization
//!
//! Invariant violations (a relocation lookup miss, a double slot assignment,
//! a locked object observed while the heap is supposed to be quiesced) are
//! *not* represented here: they are programming-contract failures and panic
//! with the identity of the offending structure.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for image-writer operations
///
/// # Examples
///
/// ```rust
/// use fimg::FimgError;
///
/// fn handle(err: FimgError) {
///     match err {
///         FimgError::Allocation { requested, .. } => {
///             eprintln!("could not reserve {} bytes", requested);
///         }
///         other => eprintln!("build failed: {}", other),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum FimgError {
    /// Destination memory reservation failed
    ///
    /// **When returned:** anonymous mapping for an image or its bitmap
    /// could not be created.
    ///
    /// **Recovery strategy:** caller may retry with a smaller heap or give up.
    #[error("Image allocation failed: requested {requested} bytes: {reason}")]
    Allocation { requested: usize, reason: String },

    /// Output file I/O failure
    ///
    /// **When returned:** creating, writing, or flushing an image file
    /// failed. The partially written file has already been erased.
    #[error("Image I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid build configuration
    ///
    /// **When returned:** `ImageConfig::validate` rejects a parameter
    /// combination (for example a region size that is not object-aligned).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal consistency check failed during serialization
    ///
    /// **When returned:** a section size or offset does not match what the
    /// layout phase computed. Indicates a bug in the pipeline.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl FimgError {
    /// Check if the caller can reasonably retry after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FimgError::Allocation { .. } | FimgError::Io { .. })
    }

    /// Check if this error indicates a bug in the pipeline itself.
    pub fn is_bug(&self) -> bool {
        matches!(self, FimgError::Validation(_))
    }
}

/// Result type alias for image-writer operations
pub type Result<T> = std::result::Result<T, FimgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let err = FimgError::Allocation {
            requested: 4096,
            reason: "out of address space".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(!err.is_bug());

        let err = FimgError::Validation("section overlap".to_string());
        assert!(err.is_bug());
        assert!(!err.is_recoverable());
    }
}
