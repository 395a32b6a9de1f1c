//! Line framing for streamed response bodies.
//!
//! Both the chat endpoint (server-sent events) and the download endpoint
//! (one progress line per update) deliver text lines that network frames may
//! split at arbitrary byte offsets, including inside a UTF-8 sequence.

use std::sync::LazyLock;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use regex::Regex;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use super::types::{DownloadProgress, StreamChunk, WireChunk, WireDownloadResult};
use super::FoundryError;

/// Longest line accepted from a streamed body.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Split a streamed body into text lines (without `\r\n`).
///
/// A trailing line without a newline is still yielded when the body ends.
/// A line longer than [`MAX_LINE_BYTES`] or one that is not valid UTF-8 is
/// a `StreamDecode` error.
pub fn frame_lines<S, E>(body: S) -> impl Stream<Item = Result<String, FoundryError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let reader = StreamReader::new(body.map(|frame| frame.map_err(std::io::Error::other)));
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES))
        .map(|line| line.map_err(line_error))
}

fn line_error(e: LinesCodecError) -> FoundryError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            FoundryError::StreamDecode(format!("line longer than {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io) if io.kind() == std::io::ErrorKind::InvalidData => {
            FoundryError::StreamDecode(io.to_string())
        }
        LinesCodecError::Io(io) => FoundryError::Network(io.to_string()),
    }
}

// ──────────────────────────────────────────────
// Server-sent events
// ──────────────────────────────────────────────

/// Classification of one SSE line.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// `data: <payload>` other than the terminator.
    Data(&'a str),
    /// `data: [DONE]`.
    Done,
    /// Blank separators, comments, `event:`/`id:`/`retry:` fields.
    Ignore,
}

pub fn parse_sse_line(line: &str) -> SseLine<'_> {
    let Some(payload) = line.strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        SseLine::Done
    } else if payload.is_empty() {
        SseLine::Ignore
    } else {
        SseLine::Data(payload)
    }
}

/// Decode one `data:` payload of a chat completion stream.
pub fn decode_chat_payload(payload: &str) -> Result<Option<StreamChunk>, FoundryError> {
    let chunk: WireChunk = serde_json::from_str(payload)
        .map_err(|e| FoundryError::StreamDecode(format!("{e}: {payload}")))?;
    Ok(chunk.into_stream_chunk())
}

// ──────────────────────────────────────────────
// Download progress lines
// ──────────────────────────────────────────────

/// One line of a download response body.
#[derive(Debug, PartialEq)]
pub enum DownloadLine {
    Progress(DownloadProgress),
    Completed,
    Failed(String),
    Ignore,
}

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").expect("static regex"));

pub fn parse_download_line(line: &str) -> DownloadLine {
    let line = line.trim();
    if line.starts_with('{') {
        if let Ok(result) = serde_json::from_str::<WireDownloadResult>(line) {
            return if result.success {
                DownloadLine::Completed
            } else {
                DownloadLine::Failed(
                    result
                        .error_message
                        .unwrap_or_else(|| "unknown error".to_string()),
                )
            };
        }
    }

    PERCENT
        .captures(line)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .map(|percent| {
            DownloadLine::Progress(DownloadProgress {
                percent: percent.clamp(0.0, 100.0),
            })
        })
        .unwrap_or(DownloadLine::Ignore)
}
