use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::traits::{ChatTransport, ModelProvider};
use super::types::{
    validate_model_name, CatalogModel, ChatRequest, ChunkStream, DownloadProgress, StreamChunk,
};
use super::FoundryError;

/// One scripted answer to a `generate_streaming` call.
#[derive(Debug, Clone)]
enum ScriptedReply {
    /// Yield the chunks, then end.
    Chunks(Vec<StreamChunk>),
    /// Yield the chunks, then fail.
    Failure(Vec<StreamChunk>, FoundryError),
    /// Yield the chunks, then never produce another item.
    Stalled(Vec<StreamChunk>),
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<ScriptedReply>,
    requests: Vec<ChatRequest>,
    cached: Vec<String>,
    loaded: Vec<String>,
}

/// In-process stand-in for the local model service.
///
/// Replies are consumed in the order they were scripted, one per
/// generation request. A request with no scripted reply fails with HTTP 500.
#[derive(Debug, Clone)]
pub struct MockFoundry {
    state: Arc<Mutex<MockState>>,
    catalog: Vec<CatalogModel>,
    failing_downloads: Vec<String>,
}

impl Default for MockFoundry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFoundry {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            catalog: Vec::new(),
            failing_downloads: Vec::new(),
        }
    }

    /// Script a reply made of raw chunks.
    pub fn with_reply(self, chunks: Vec<StreamChunk>) -> Self {
        self.push(ScriptedReply::Chunks(chunks))
    }

    /// Script a reply of text fragments followed by a `stop` finish chunk.
    pub fn replying(self, fragments: &[&str]) -> Self {
        self.enqueue_reply(fragments);
        self
    }

    /// Same as `replying`, for a mock that is already shared.
    pub fn enqueue_reply<S: AsRef<str>>(&self, fragments: &[S]) {
        let mut chunks: Vec<StreamChunk> = fragments
            .iter()
            .map(|f| StreamChunk::text(f.as_ref()))
            .collect();
        chunks.push(StreamChunk::finished("stop"));
        self.lock().replies.push_back(ScriptedReply::Chunks(chunks));
    }

    /// Script a reply that fails with `error` after `chunks`.
    pub fn with_failure(self, chunks: Vec<StreamChunk>, error: FoundryError) -> Self {
        self.push(ScriptedReply::Failure(chunks, error))
    }

    /// Script a reply that hangs after `chunks`.
    pub fn with_stalled_reply(self, chunks: Vec<StreamChunk>) -> Self {
        self.push(ScriptedReply::Stalled(chunks))
    }

    /// Set the catalog and the ids already in the local cache.
    pub fn with_catalog(mut self, models: Vec<CatalogModel>, cached: &[&str]) -> Self {
        self.catalog = models;
        self.lock().cached = cached.iter().map(|id| id.to_string()).collect();
        self
    }

    /// Make downloads of `model_id` fail after the first progress report.
    pub fn with_failing_download(mut self, model_id: &str) -> Self {
        self.failing_downloads.push(model_id.to_string());
        self
    }

    /// Requests that actually reached the service, in order.
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.lock().requests.clone()
    }

    pub fn loaded_models(&self) -> Vec<String> {
        self.lock().loaded.clone()
    }

    fn push(self, reply: ScriptedReply) -> Self {
        self.lock().replies.push_back(reply);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChatTransport for MockFoundry {
    fn generate_streaming(&self, request: ChatRequest) -> ChunkStream {
        let state = Arc::clone(&self.state);

        Box::pin(async_stream::try_stream! {
            let reply = {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.requests.push(request);
                state.replies.pop_front()
            };
            let reply = reply.ok_or_else(|| FoundryError::ApiError {
                status: 500,
                message: "no scripted reply".to_string(),
            })?;

            match reply {
                ScriptedReply::Chunks(chunks) => {
                    for chunk in chunks {
                        yield chunk;
                    }
                }
                ScriptedReply::Failure(chunks, error) => {
                    for chunk in chunks {
                        yield chunk;
                    }
                    Err::<(), _>(error)?;
                }
                ScriptedReply::Stalled(chunks) => {
                    for chunk in chunks {
                        yield chunk;
                    }
                    std::future::pending::<()>().await;
                }
            }
        })
    }
}

impl ModelProvider for MockFoundry {
    fn endpoint(&self) -> &str {
        "http://localhost:5273"
    }

    fn api_key(&self) -> &str {
        "OPENAI_API_KEY"
    }

    async fn list_catalog_models(&self) -> Result<Vec<CatalogModel>, FoundryError> {
        Ok(self.catalog.clone())
    }

    async fn list_cached_models(&self) -> Result<Vec<String>, FoundryError> {
        Ok(self.lock().cached.clone())
    }

    async fn load_model(&self, model_id: &str) -> Result<(), FoundryError> {
        validate_model_name(model_id)?;
        let mut state = self.lock();
        if !state.cached.iter().any(|id| id == model_id) {
            return Err(FoundryError::ApiError {
                status: 404,
                message: format!("model {model_id} is not downloaded"),
            });
        }
        if !state.loaded.iter().any(|id| id == model_id) {
            state.loaded.push(model_id.to_string());
        }
        Ok(())
    }

    async fn unload_model(&self, model_id: &str) -> Result<(), FoundryError> {
        validate_model_name(model_id)?;
        self.lock().loaded.retain(|id| id != model_id);
        Ok(())
    }

    async fn download_model(
        &self,
        model: &CatalogModel,
        progress_tx: mpsc::Sender<DownloadProgress>,
    ) -> Result<(), FoundryError> {
        validate_model_name(&model.id)?;
        let fails = self.failing_downloads.iter().any(|id| *id == model.id);

        for percent in [25.0, 50.0, 100.0] {
            progress_tx
                .send(DownloadProgress { percent })
                .await
                .map_err(|_| FoundryError::DownloadCancelled)?;
            if fails {
                return Err(FoundryError::DownloadFailed(format!(
                    "simulated failure for {}",
                    model.id
                )));
            }
        }

        let mut state = self.lock();
        if !state.cached.iter().any(|id| *id == model.id) {
            state.cached.push(model.id.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{StreamExt, TryStreamExt};

    fn request() -> ChatRequest {
        ChatRequest::single_prompt("phi-4-mini", "prompt".into(), Default::default())
    }

    fn model(id: &str) -> CatalogModel {
        CatalogModel {
            id: id.into(),
            alias: None,
            device_type: "CPU".into(),
            file_size_mb: None,
            uri: None,
            provider_type: None,
        }
    }

    #[tokio::test]
    async fn replies_are_consumed_in_order() {
        let mock = MockFoundry::new().replying(&["a", "b"]).replying(&["c"]);

        let first: Vec<StreamChunk> = mock.generate_streaming(request()).try_collect().await.unwrap();
        let second: Vec<StreamChunk> =
            mock.generate_streaming(request()).try_collect().await.unwrap();

        assert_eq!(
            first,
            vec![
                StreamChunk::text("a"),
                StreamChunk::text("b"),
                StreamChunk::finished("stop")
            ]
        );
        assert_eq!(second.len(), 2);
        assert_eq!(mock.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn request_is_recorded_only_when_polled() {
        let mock = MockFoundry::new().replying(&["a"]);
        let stream = mock.generate_streaming(request());
        assert!(mock.recorded_requests().is_empty());
        drop(stream);
        assert!(mock.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn unscripted_request_fails() {
        let mock = MockFoundry::new();
        let result: Result<Vec<StreamChunk>, _> =
            mock.generate_streaming(request()).try_collect().await;
        assert!(matches!(
            result,
            Err(FoundryError::ApiError { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn failure_follows_chunks() {
        let mock = MockFoundry::new().with_failure(
            vec![StreamChunk::text("{")],
            FoundryError::Network("reset".into()),
        );
        let items: Vec<_> = mock.generate_streaming(request()).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(StreamChunk::text("{")));
        assert_eq!(items[1], Err(FoundryError::Network("reset".into())));
    }

    #[tokio::test]
    async fn download_then_load() {
        let mock = MockFoundry::new().with_catalog(vec![model("phi-4-mini")], &[]);
        let (tx, mut rx) = mpsc::channel(8);

        mock.download_model(&model("phi-4-mini"), tx).await.unwrap();
        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            seen.push(p.percent);
        }
        assert_eq!(seen, vec![25.0, 50.0, 100.0]);
        assert_eq!(mock.list_cached_models().await.unwrap(), vec!["phi-4-mini"]);

        mock.load_model("phi-4-mini").await.unwrap();
        assert_eq!(mock.loaded_models(), vec!["phi-4-mini"]);
        mock.unload_model("phi-4-mini").await.unwrap();
        assert!(mock.loaded_models().is_empty());
    }

    #[tokio::test]
    async fn loading_uncached_model_fails() {
        let mock = MockFoundry::new().with_catalog(vec![model("phi-4-mini")], &[]);
        assert!(mock.load_model("phi-4-mini").await.is_err());
    }

    #[tokio::test]
    async fn failing_download_reports_error() {
        let mock = MockFoundry::new()
            .with_catalog(vec![model("phi-4-mini")], &[])
            .with_failing_download("phi-4-mini");
        let (tx, _rx) = mpsc::channel(8);
        let result = mock.download_model(&model("phi-4-mini"), tx).await;
        assert!(matches!(result, Err(FoundryError::DownloadFailed(_))));
        assert!(mock.list_cached_models().await.unwrap().is_empty());
    }
}
