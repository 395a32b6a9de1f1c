use std::future::Future;

use tokio::sync::mpsc;

use super::types::{CatalogModel, ChatRequest, ChunkStream, DownloadProgress};
use super::FoundryError;

/// Streaming text generation (allows mocking).
///
/// The returned stream is lazy: no request is issued until it is first
/// polled. Dropping the stream aborts the in-flight request, which is how
/// callers cancel generation.
pub trait ChatTransport: Send + Sync {
    fn generate_streaming(&self, request: ChatRequest) -> ChunkStream;
}

/// Model lifecycle operations of the local service.
pub trait ModelProvider: Send + Sync {
    /// Base URL of the service (also the chat endpoint root).
    fn endpoint(&self) -> &str;

    /// Credential presented to the chat endpoint.
    fn api_key(&self) -> &str;

    fn list_catalog_models(
        &self,
    ) -> impl Future<Output = Result<Vec<CatalogModel>, FoundryError>> + Send;

    /// Ids of models already downloaded to the local cache.
    fn list_cached_models(&self) -> impl Future<Output = Result<Vec<String>, FoundryError>> + Send;

    fn load_model(&self, model_id: &str) -> impl Future<Output = Result<(), FoundryError>> + Send;

    fn unload_model(&self, model_id: &str)
        -> impl Future<Output = Result<(), FoundryError>> + Send;

    /// Download a model, reporting progress on `progress_tx`.
    ///
    /// Dropping the receiver cancels the download.
    fn download_model(
        &self,
        model: &CatalogModel,
        progress_tx: mpsc::Sender<DownloadProgress>,
    ) -> impl Future<Output = Result<(), FoundryError>> + Send;
}
