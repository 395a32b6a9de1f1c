//! Streaming eligibility chat grounded on an extracted `StudentProfile`.

pub mod prompt;
pub mod session;

pub use prompt::*;
pub use session::*;

use thiserror::Error;

use crate::foundry::FoundryError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("Model service error: {0}")]
    Transport(#[from] FoundryError),

    #[error("Chat response was cancelled")]
    Cancelled,

    #[error("Question is empty")]
    EmptyQuestion,
}
