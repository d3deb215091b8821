//! Error types for gopforge.

use thiserror::Error;

/// Boxed error returned by an [`EncodeBackend`](crate::EncodeBackend).
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for gopforge operations.
#[derive(Error, Debug)]
pub enum GopError {
    /// Group and reference budgets cannot be reconciled.
    ///
    /// Only produced while negotiating a stream configuration, never mid-stream.
    #[error("Invalid GOP configuration: {0}")]
    Configuration(String),

    /// An engine invariant was violated (caller contract or internal bug).
    ///
    /// The scheduler has no retry path; the encode session should be aborted.
    #[error("GOP sequence error: {0}")]
    Sequence(String),

    /// The encode backend failed for a specific frame.
    #[error("Encode of frame {display_index} failed: {source}")]
    Encode {
        /// Display index of the frame that failed.
        display_index: u64,
        /// Backend error.
        #[source]
        source: BackendError,
    },
}

impl GopError {
    pub(crate) fn sequence(msg: impl Into<String>) -> Self {
        GopError::Sequence(msg.into())
    }

    /// Whether this is an invariant violation rather than a configuration or backend failure.
    pub fn is_sequence(&self) -> bool {
        matches!(self, GopError::Sequence(_))
    }
}

/// Result type for gopforge operations.
pub type Result<T> = std::result::Result<T, GopError>;
