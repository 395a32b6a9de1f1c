//! Local model service integration.
//!
//! The local service hosts an OpenAI-compatible chat endpoint plus a small
//! model lifecycle API (catalog, cache, download, load, unload). Everything
//! above this module talks to it through the `ModelProvider` and
//! `ChatTransport` traits so the pipeline can be driven by `MockFoundry`.

pub mod client;
pub mod mock;
pub mod sse;
pub mod traits;
pub mod types;

pub use client::*;
pub use mock::*;
pub use traits::*;
pub use types::*;

use thiserror::Error;

/// Error taxonomy for the local model service.
///
/// Messages are complete sentences: they are shown to support staff as-is.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FoundryError {
    #[error("The local model service is not running at {0}")]
    NotReachable(String),

    #[error("The model service returned an error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Connecting to the model service timed out after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed streaming response from the model service: {0}")]
    StreamDecode(String),

    #[error("Model '{0}' is not in the catalog")]
    ModelNotFound(String),

    #[error("Invalid model name: '{0}'")]
    InvalidModelName(String),

    #[error("Only localhost connections are allowed")]
    NonLocalEndpoint,

    #[error("Invalid URL format")]
    InvalidUrl,

    #[error("Model download failed: {0}")]
    DownloadFailed(String),

    #[error("Model download was cancelled")]
    DownloadCancelled,
}
