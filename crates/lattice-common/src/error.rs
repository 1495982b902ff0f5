//! Error types for lattice.

use thiserror::Error;

/// Result type alias using LatticeError.
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Errors surfaced by the lattice storage and index layers.
///
/// Negative lookup results and duplicate-key inserts are ordinary return
/// values, not errors.
#[derive(Debug, Error)]
pub enum LatticeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer pool full, every frame is pinned")]
    BufferPoolFull,

    #[error("page not found: {page_id}")]
    PageNotFound { page_id: i32 },

    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: &'static str, value: String },

    /// A structural invariant was violated. The index is considered unsafe
    /// to continue using; callers should not attempt recovery.
    #[error("index corrupted: {0}")]
    Corrupted(String),
}
