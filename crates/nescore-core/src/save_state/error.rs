//! Save state error types.

use thiserror::Error;

/// Save state operation error.
#[derive(Debug, Error)]
pub enum SaveStateError {
    /// The buffer handed to `load` does not match the size this handle's
    /// state tree occupies. Loading a buffer captured from a different ROM
    /// (or a different mapper/CHR-RAM configuration) is undefined and not
    /// otherwise detected.
    #[error("invalid save state: expected {expected} bytes, got {actual}")]
    InvalidSaveState {
        /// Bytes the current state tree occupies.
        expected: usize,
        /// Bytes actually supplied.
        actual: usize,
    },
}
