//! Local model service types, wire formats, and security validators.

use std::pin::Pin;
use std::sync::LazyLock;

use futures_util::Stream;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::FoundryError;

// ──────────────────────────────────────────────
// Streaming chat types
// ──────────────────────────────────────────────

/// One fragment of streamed model output.
///
/// `finish_reason` is set on the chunk that terminates the stream
/// ("stop", "length", ...). Its text may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: None,
        }
    }

    pub fn finished(reason: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            finish_reason: Some(reason.into()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Lazy, single-pass stream of chunks for one generation request.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, FoundryError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling controls. `None` leaves the model default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// One streaming chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
}

impl ChatRequest {
    /// A request made of a single user message.
    pub fn single_prompt(model: &str, prompt: String, options: GenerationOptions) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage::user(prompt)],
            options,
        }
    }
}

// ──────────────────────────────────────────────
// Model lifecycle types
// ──────────────────────────────────────────────

/// A model offered by the local service catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogModel {
    pub id: String,
    pub alias: Option<String>,
    /// "CPU", "GPU", "NPU".
    pub device_type: String,
    pub file_size_mb: Option<u64>,
    /// Registry location, forwarded to the download endpoint.
    pub uri: Option<String>,
    pub provider_type: Option<String>,
}

/// Download progress for a single model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// 0.0 to 100.0.
    pub percent: f64,
}

impl DownloadProgress {
    pub fn status_text(&self) -> String {
        format!("Downloading... {:.1}%", self.percent)
    }
}

// ──────────────────────────────────────────────
// Security validators
// ──────────────────────────────────────────────

/// Validate that a base URL points to the loopback interface.
///
/// Student messages contain SSNs; they must never leave the machine.
/// Accepts: localhost, 127.0.0.1, [::1].
pub fn validate_base_url(url: &str) -> Result<(), FoundryError> {
    let after_scheme = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or(FoundryError::InvalidUrl)?;

    let host = if after_scheme.starts_with('[') {
        after_scheme
            .split(']')
            .next()
            .unwrap_or("")
            .trim_start_matches('[')
    } else {
        after_scheme
            .split(':')
            .next()
            .unwrap_or("")
            .split('/')
            .next()
            .unwrap_or("")
    };

    match host {
        "localhost" | "127.0.0.1" | "::1" => Ok(()),
        "" => Err(FoundryError::InvalidUrl),
        _ => Err(FoundryError::NonLocalEndpoint),
    }
}

static MODEL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*(:[a-zA-Z0-9._-]+)?$").expect("static regex")
});

/// Validate a model id before it is embedded in a request path.
///
/// Format: `name[:version]`. Load and unload put the id in the URL path,
/// so `/` is rejected outright.
pub fn validate_model_name(name: &str) -> Result<(), FoundryError> {
    if name.is_empty() || !MODEL_NAME.is_match(name) {
        return Err(FoundryError::InvalidModelName(name.to_string()));
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Wire types (internal)
// ──────────────────────────────────────────────

/// Request body for POST `/v1/chat/completions`.
#[derive(Debug, Serialize)]
pub(crate) struct WireChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl<'a> WireChatRequest<'a> {
    pub fn streaming(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens,
        }
    }
}

/// One SSE `data:` payload of a streamed chat completion.
#[derive(Debug, Deserialize)]
pub(crate) struct WireChunk {
    #[serde(default)]
    pub choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireChoice {
    #[serde(default)]
    pub delta: WireDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireDelta {
    pub content: Option<String>,
}

impl WireChunk {
    /// First choice as a `StreamChunk`; `None` for role-only or empty events.
    pub fn into_stream_chunk(self) -> Option<StreamChunk> {
        let choice = self.choices.into_iter().next()?;
        let text = choice.delta.content.unwrap_or_default();
        if text.is_empty() && choice.finish_reason.is_none() {
            return None;
        }
        Some(StreamChunk {
            text,
            finish_reason: choice.finish_reason,
        })
    }
}

/// Catalog entry from GET `/foundry/list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireCatalogModel {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub runtime: Option<WireRuntime>,
    #[serde(default)]
    pub file_size_mb: Option<u64>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub provider_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireRuntime {
    pub device_type: String,
}

impl From<WireCatalogModel> for CatalogModel {
    fn from(m: WireCatalogModel) -> Self {
        CatalogModel {
            id: m.name,
            alias: m.alias,
            device_type: m
                .runtime
                .map(|r| r.device_type)
                .unwrap_or_else(|| "CPU".to_string()),
            file_size_mb: m.file_size_mb,
            uri: m.uri,
            provider_type: m.provider_type,
        }
    }
}

/// Request body for POST `/openai/download`.
#[derive(Debug, Serialize)]
pub(crate) struct WireDownloadRequest<'a> {
    pub model: WireDownloadModel<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireDownloadModel<'a> {
    #[serde(rename = "Name")]
    pub name: &'a str,
    #[serde(rename = "Uri", skip_serializing_if = "Option::is_none")]
    pub uri: Option<&'a str>,
    #[serde(rename = "ProviderType", skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<&'a str>,
}

/// Final line of a download stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireDownloadResult {
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
