//! Streaming structured extraction of a `StudentProfile` from a student
//! message.
//!
//! One run issues a single streaming generation request, relays each raw
//! chunk as `ExtractionUpdate::Partial`, and finishes with one
//! `ExtractionUpdate::Final` once the accumulated text survives recovery.

pub mod driver;
pub mod prompt;
pub mod recovery;
pub mod types;

pub use driver::*;
pub use prompt::*;
pub use recovery::*;
pub use types::*;

use thiserror::Error;

use crate::foundry::FoundryError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Model service error: {0}")]
    Transport(#[from] FoundryError),

    /// `raw` is the accumulated model output before any cleanup.
    #[error("Failed to parse response:\n\n{raw}")]
    Parse { raw: String, reason: String },

    #[error("Extraction was cancelled")]
    Cancelled,
}

impl ExtractionError {
    /// User-initiated abort rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExtractionError::Cancelled)
    }
}
