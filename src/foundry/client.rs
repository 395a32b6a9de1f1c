use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::sse::{
    decode_chat_payload, frame_lines, parse_download_line, parse_sse_line, DownloadLine, SseLine,
};
use super::traits::{ChatTransport, ModelProvider};
use super::types::{
    validate_base_url, validate_model_name, CatalogModel, ChatRequest, ChunkStream,
    DownloadProgress, StreamChunk, WireCatalogModel, WireChatRequest, WireDownloadModel,
    WireDownloadRequest,
};
use super::FoundryError;
use crate::config::AppConfig;

/// HTTP client for the local model service.
///
/// Only a connect timeout is configured: generation and downloads are
/// long-running streams and must not be cut off by a request deadline.
#[derive(Clone)]
pub struct FoundryClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    connect_timeout_secs: u64,
}

impl FoundryClient {
    /// Create a client for a loopback service URL.
    pub fn new(
        base_url: &str,
        api_key: &str,
        connect_timeout_secs: u64,
    ) -> Result<Self, FoundryError> {
        validate_base_url(base_url)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .build()
            .map_err(|e| FoundryError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            connect_timeout_secs,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, FoundryError> {
        Self::new(
            &config.service_url,
            &config.api_key,
            config.connect_timeout_secs,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, FoundryError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| send_error(&self.base_url, self.connect_timeout_secs, e))?;
        ensure_success(response).await
    }
}

/// Map a transport-level reqwest failure onto the error taxonomy.
fn send_error(base_url: &str, connect_timeout_secs: u64, e: reqwest::Error) -> FoundryError {
    if e.is_connect() {
        FoundryError::NotReachable(base_url.to_string())
    } else if e.is_timeout() {
        FoundryError::Timeout(connect_timeout_secs)
    } else {
        FoundryError::Network(e.to_string())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, FoundryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(FoundryError::ApiError {
        status: status.as_u16(),
        message,
    })
}

fn boxed<S>(stream: S) -> ChunkStream
where
    S: Stream<Item = Result<StreamChunk, FoundryError>> + Send + 'static,
{
    Box::pin(stream)
}

impl ChatTransport for FoundryClient {
    fn generate_streaming(&self, request: ChatRequest) -> ChunkStream {
        let http = self.client.clone();
        let url = self.url("/v1/chat/completions");
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        let connect_timeout_secs = self.connect_timeout_secs;

        boxed(async_stream::try_stream! {
            tracing::debug!(
                model = %request.model,
                messages = request.messages.len(),
                "Opening chat completion stream"
            );

            let response = http
                .post(&url)
                .bearer_auth(&api_key)
                .json(&WireChatRequest::streaming(&request))
                .send()
                .await
                .map_err(|e| send_error(&base_url, connect_timeout_secs, e))?;
            let response = ensure_success(response).await?;

            let mut lines = Box::pin(frame_lines(response.bytes_stream()));
            while let Some(line) = lines.next().await {
                match parse_sse_line(&line?) {
                    SseLine::Data(payload) => {
                        if let Some(chunk) = decode_chat_payload(payload)? {
                            yield chunk;
                        }
                    }
                    SseLine::Done => break,
                    SseLine::Ignore => {}
                }
            }
        })
    }
}

impl ModelProvider for FoundryClient {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }

    async fn list_catalog_models(&self) -> Result<Vec<CatalogModel>, FoundryError> {
        let models: Vec<WireCatalogModel> = self
            .get("/foundry/list")
            .await?
            .json()
            .await
            .map_err(|e| FoundryError::StreamDecode(e.to_string()))?;
        Ok(models.into_iter().map(CatalogModel::from).collect())
    }

    async fn list_cached_models(&self) -> Result<Vec<String>, FoundryError> {
        self.get("/openai/models")
            .await?
            .json()
            .await
            .map_err(|e| FoundryError::StreamDecode(e.to_string()))
    }

    async fn load_model(&self, model_id: &str) -> Result<(), FoundryError> {
        validate_model_name(model_id)?;
        tracing::info!(model = %model_id, "Loading model into memory");
        self.get(&format!("/openai/load/{model_id}")).await?;
        Ok(())
    }

    async fn unload_model(&self, model_id: &str) -> Result<(), FoundryError> {
        validate_model_name(model_id)?;
        tracing::info!(model = %model_id, "Unloading model");
        self.get(&format!("/openai/unload/{model_id}")).await?;
        Ok(())
    }

    async fn download_model(
        &self,
        model: &CatalogModel,
        progress_tx: mpsc::Sender<DownloadProgress>,
    ) -> Result<(), FoundryError> {
        validate_model_name(&model.id)?;
        tracing::info!(model = %model.id, "Starting model download");

        let body = WireDownloadRequest {
            model: WireDownloadModel {
                name: &model.id,
                uri: model.uri.as_deref(),
                provider_type: model.provider_type.as_deref(),
            },
        };
        let response = self
            .client
            .post(self.url("/openai/download"))
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(&self.base_url, self.connect_timeout_secs, e))?;
        let response = ensure_success(response).await?;

        let mut lines = Box::pin(frame_lines(response.bytes_stream()));
        while let Some(line) = lines.next().await {
            if let Some(outcome) = handle_download_line(&line?, &progress_tx).await? {
                return outcome;
            }
        }

        Err(FoundryError::DownloadFailed(
            "download stream ended without a result".to_string(),
        ))
    }
}

/// Forward progress; `Some(outcome)` once the terminal result line arrives.
async fn handle_download_line(
    line: &str,
    progress_tx: &mpsc::Sender<DownloadProgress>,
) -> Result<Option<Result<(), FoundryError>>, FoundryError> {
    match parse_download_line(line) {
        DownloadLine::Progress(progress) => {
            progress_tx
                .send(progress)
                .await
                .map_err(|_| FoundryError::DownloadCancelled)?;
            Ok(None)
        }
        DownloadLine::Completed => Ok(Some(Ok(()))),
        DownloadLine::Failed(message) => Ok(Some(Err(FoundryError::DownloadFailed(message)))),
        DownloadLine::Ignore => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundry::sse;
    use std::sync::{Arc, Mutex};

    use axum::extract::Path;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use futures_util::TryStreamExt;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{}", addr.port())
    }

    fn sse_route(body: &'static str) -> Router {
        Router::new().route(
            "/v1/chat/completions",
            post(move || async move { ([(header::CONTENT_TYPE, "text/event-stream")], body) }),
        )
    }

    fn request() -> ChatRequest {
        ChatRequest::single_prompt("phi-4-mini", "prompt".into(), Default::default())
    }

    const SSE_BODY: &str = concat!(
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"{\\\"GPA\\\"\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\": 3.5}\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    #[test]
    fn constructor_trims_trailing_slash() {
        let client = FoundryClient::new("http://localhost:5273/", "key", 5).unwrap();
        assert_eq!(client.base_url(), "http://localhost:5273");
        assert_eq!(client.endpoint(), "http://localhost:5273");
        assert_eq!(client.api_key(), "key");
    }

    #[test]
    fn constructor_rejects_remote_service() {
        let result = FoundryClient::new("http://models.example.com", "key", 5);
        assert!(matches!(result, Err(FoundryError::NonLocalEndpoint)));
    }

    #[tokio::test]
    async fn streams_chunks_until_done() {
        let base = serve(sse_route(SSE_BODY)).await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        let chunks: Vec<StreamChunk> = client
            .generate_streaming(request())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            chunks,
            vec![
                StreamChunk::text("{\"GPA\""),
                StreamChunk::text(": 3.5}"),
                StreamChunk::finished("stop"),
            ]
        );
    }

    #[tokio::test]
    async fn sends_bearer_key_and_streaming_body() {
        let captured: Arc<Mutex<Option<(String, serde_json::Value)>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&captured);
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    let auth = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    *sink.lock().unwrap() = Some((auth, body));
                    ([(header::CONTENT_TYPE, "text/event-stream")], "data: [DONE]\n\n")
                }
            }),
        );
        let base = serve(app).await;
        let client = FoundryClient::new(&base, "secret-key", 5).unwrap();

        let chunks: Vec<StreamChunk> = client
            .generate_streaming(request())
            .try_collect()
            .await
            .unwrap();
        assert!(chunks.is_empty());

        let (auth, body) = captured.lock().unwrap().clone().unwrap();
        assert_eq!(auth, "Bearer secret-key");
        assert_eq!(body["model"], "phi-4-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["content"], "prompt");
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::NOT_FOUND, "model not loaded") }),
        );
        let base = serve(app).await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        let result: Result<Vec<StreamChunk>, _> =
            client.generate_streaming(request()).try_collect().await;
        assert_eq!(
            result.unwrap_err(),
            FoundryError::ApiError {
                status: 404,
                message: "model not loaded".into()
            }
        );
    }

    #[tokio::test]
    async fn malformed_event_is_decode_error() {
        let base = serve(sse_route("data: {oops}\n\n")).await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        let result: Result<Vec<StreamChunk>, _> =
            client.generate_streaming(request()).try_collect().await;
        assert!(matches!(result, Err(FoundryError::StreamDecode(_))));
    }

    #[tokio::test]
    async fn body_without_done_sentinel_still_ends() {
        let base = serve(sse_route(
            "data: {\"choices\":[{\"delta\":{\"content\":\"{}\"},\"finish_reason\":\"stop\"}]}",
        ))
        .await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        let chunks: Vec<StreamChunk> = client
            .generate_streaming(request())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "{}");
        assert!(chunks[0].is_finished());
    }

    #[tokio::test]
    async fn oversized_event_line_is_decode_error() {
        let body = format!("data: {}\n\n", "x".repeat(sse::MAX_LINE_BYTES + 1));
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || async move { ([(header::CONTENT_TYPE, "text/event-stream")], body) }),
        );
        let base = serve(app).await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        let result: Result<Vec<StreamChunk>, _> =
            client.generate_streaming(request()).try_collect().await;
        assert!(matches!(result, Err(FoundryError::StreamDecode(_))));
    }

    #[tokio::test]
    async fn closed_port_is_not_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let base = format!("http://127.0.0.1:{port}");
        let client = FoundryClient::new(&base, "key", 5).unwrap();
        let result: Result<Vec<StreamChunk>, _> =
            client.generate_streaming(request()).try_collect().await;
        assert_eq!(result.unwrap_err(), FoundryError::NotReachable(base));
    }

    #[tokio::test]
    async fn lists_catalog_and_cache() {
        let app = Router::new()
            .route(
                "/foundry/list",
                get(|| async {
                    Json(serde_json::json!([
                        {"name": "Phi-4-mini-instruct-generic-cpu", "alias": "phi-4-mini",
                         "runtime": {"deviceType": "CPU"}, "fileSizeMb": 4800},
                        {"name": "deepseek-r1-distill-qwen-7b-qnn-npu", "alias": "deepseek-r1-7b",
                         "runtime": {"deviceType": "NPU"}}
                    ]))
                }),
            )
            .route(
                "/openai/models",
                get(|| async { Json(serde_json::json!(["Phi-4-mini-instruct-generic-cpu"])) }),
            );
        let base = serve(app).await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        let catalog = client.list_catalog_models().await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[1].device_type, "NPU");

        let cached = client.list_cached_models().await.unwrap();
        assert_eq!(cached, vec!["Phi-4-mini-instruct-generic-cpu".to_string()]);
    }

    #[tokio::test]
    async fn load_and_unload_hit_model_paths() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let load_sink = Arc::clone(&seen);
        let unload_sink = Arc::clone(&seen);
        let app = Router::new()
            .route(
                "/openai/load/:id",
                get(move |Path(id): Path<String>| {
                    let sink = Arc::clone(&load_sink);
                    async move {
                        sink.lock().unwrap().push(format!("load {id}"));
                        StatusCode::OK
                    }
                }),
            )
            .route(
                "/openai/unload/:id",
                get(move |Path(id): Path<String>| {
                    let sink = Arc::clone(&unload_sink);
                    async move {
                        sink.lock().unwrap().push(format!("unload {id}"));
                        StatusCode::OK
                    }
                }),
            );
        let base = serve(app).await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        client.load_model("phi-4-mini").await.unwrap();
        client.unload_model("phi-4-mini").await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["load phi-4-mini".to_string(), "unload phi-4-mini".to_string()]
        );
    }

    #[tokio::test]
    async fn load_rejects_invalid_name_before_request() {
        let client = FoundryClient::new("http://127.0.0.1:9", "key", 1).unwrap();
        let result = client.load_model("../../admin").await;
        assert!(matches!(result, Err(FoundryError::InvalidModelName(_))));
    }

    fn catalog_model(id: &str) -> CatalogModel {
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
    async fn download_reports_progress_then_completes() {
        let app = Router::new().route(
            "/openai/download",
            post(|| async { "Total 10.0%\nTotal 55.5%\nTotal 100%\n{\"success\":true,\"errorMessage\":null}\n" }),
        );
        let base = serve(app).await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        client
            .download_model(&catalog_model("phi-4-mini"), tx)
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(progress) = rx.recv().await {
            seen.push(progress.percent);
        }
        assert_eq!(seen, vec![10.0, 55.5, 100.0]);
    }

    #[tokio::test]
    async fn download_failure_result_is_error() {
        let app = Router::new().route(
            "/openai/download",
            post(|| async { "Total 5%\n{\"success\":false,\"errorMessage\":\"disk full\"}" }),
        );
        let base = serve(app).await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let result = client.download_model(&catalog_model("phi-4-mini"), tx).await;
        assert_eq!(result, Err(FoundryError::DownloadFailed("disk full".into())));
    }

    #[tokio::test]
    async fn download_without_result_line_fails() {
        let app = Router::new().route("/openai/download", post(|| async { "Total 50%\n" }));
        let base = serve(app).await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let result = client.download_model(&catalog_model("phi-4-mini"), tx).await;
        assert!(matches!(result, Err(FoundryError::DownloadFailed(_))));
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_download() {
        let app = Router::new().route(
            "/openai/download",
            post(|| async { "Total 50%\n{\"success\":true}\n" }),
        );
        let base = serve(app).await;
        let client = FoundryClient::new(&base, "key", 5).unwrap();

        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let result = client.download_model(&catalog_model("phi-4-mini"), tx).await;
        assert_eq!(result, Err(FoundryError::DownloadCancelled));
    }
}
