use std::time::Instant;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::prompt::build_extraction_prompt;
use super::recovery::recover;
use super::types::ExtractionUpdate;
use super::ExtractionError;
use crate::foundry::{ChatRequest, ChatTransport};
use crate::model_manager::ModelSession;

/// Run one streaming extraction of `user_message` against `session`.
///
/// Nothing happens until the returned stream is first polled. Each chunk
/// without a finish reason is relayed as `Partial`; the chunk carrying the
/// finish reason (or exhaustion of the transport stream) ends consumption,
/// and the accumulated text is recovered once into a single `Final`.
///
/// Errors end the stream: a transport fault yields `Transport`, unparseable
/// output yields `Parse`, and a raised `cancel` yields `Cancelled`. A raised
/// `cancel` wins over a chunk that is already available.
pub fn extract<'a, T>(
    transport: &'a T,
    session: &'a ModelSession,
    user_message: &'a str,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<ExtractionUpdate, ExtractionError>> + Send + 'a
where
    T: ChatTransport + ?Sized,
{
    stream! {
        let run_id = Uuid::new_v4();
        let model = session.model_id.as_str();

        if cancel.is_cancelled() {
            tracing::debug!(%run_id, model = %model, "Extraction cancelled before request");
            yield Err(ExtractionError::Cancelled);
            return;
        }

        tracing::info!(
            %run_id,
            model = %model,
            message_bytes = user_message.len(),
            "Extraction started"
        );
        let started = Instant::now();

        let request = ChatRequest::single_prompt(
            model,
            build_extraction_prompt(user_message),
            session.options,
        );
        let mut chunks = transport.generate_streaming(request);
        let mut accumulated = String::new();
        let mut chunk_count = 0usize;

        loop {
            // `None` means the cancellation branch won.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = chunks.next() => Some(next),
            };

            let Some(next) = next else {
                tracing::debug!(
                    %run_id,
                    model = %model,
                    chunks = chunk_count,
                    "Extraction cancelled"
                );
                yield Err(ExtractionError::Cancelled);
                return;
            };

            match next {
                None => break,
                Some(Err(e)) => {
                    tracing::warn!(
                        %run_id,
                        model = %model,
                        chunks = chunk_count,
                        error = %e,
                        "Extraction transport failed"
                    );
                    yield Err(ExtractionError::Transport(e));
                    return;
                }
                Some(Ok(chunk)) => {
                    chunk_count += 1;
                    accumulated.push_str(&chunk.text);
                    if chunk.is_finished() {
                        break;
                    }
                    yield Ok(ExtractionUpdate::Partial { text: chunk.text });
                }
            }
        }
        drop(chunks);

        tracing::info!(
            %run_id,
            model = %model,
            chunks = chunk_count,
            bytes = accumulated.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Extraction stream finished"
        );

        match recover(&accumulated) {
            Ok(profile) => {
                tracing::info!(%run_id, empty = profile.is_empty(), "Profile recovered");
                yield Ok(ExtractionUpdate::Final { profile });
            }
            Err(e) => {
                tracing::warn!(
                    %run_id,
                    model = %model,
                    bytes = accumulated.len(),
                    "Model output could not be parsed"
                );
                yield Err(e);
            }
        }
    }
}
