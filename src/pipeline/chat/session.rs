use async_stream::stream;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::prompt::build_system_message;
use super::ChatError;
use crate::foundry::{ChatMessage, ChatRequest, ChatTransport};
use crate::model_manager::ModelSession;
use crate::models::StudentProfile;

/// Messages of prior turns kept for context (two exchanges).
pub const DEFAULT_MAX_HISTORY: usize = 4;

/// One event of a streamed chat answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatStreamEvent {
    Token { text: String },
    Done { full_text: String },
}

/// Eligibility chat about one student.
///
/// Only completed exchanges enter the history; a failed or cancelled turn
/// leaves it untouched.
#[derive(Debug, Clone)]
pub struct EligibilityChat {
    history: Vec<ChatMessage>,
    max_history: usize,
}

impl Default for EligibilityChat {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl EligibilityChat {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: Vec::new(),
            max_history,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn build_request(
        &self,
        session: &ModelSession,
        question: &str,
        profile: &StudentProfile,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(build_system_message(profile)));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(question));
        ChatRequest {
            model: session.model_id.clone(),
            messages,
            options: session.options,
        }
    }

    fn record_exchange(&mut self, question: &str, answer: &str) {
        self.history.push(ChatMessage::user(question));
        self.history.push(ChatMessage::assistant(answer));
        let excess = self.history.len().saturating_sub(self.max_history);
        self.history.drain(..excess);
    }

    /// Stream an answer to `question`, grounded on `profile`.
    ///
    /// Yields a `Token` per non-empty chunk, then one `Done` with the full
    /// answer once the exchange has been recorded.
    pub fn respond<'a, T>(
        &'a mut self,
        transport: &'a T,
        session: &'a ModelSession,
        question: &'a str,
        profile: &'a StudentProfile,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<ChatStreamEvent, ChatError>> + Send + 'a
    where
        T: ChatTransport + ?Sized,
    {
        stream! {
            let question = question.trim();
            if question.is_empty() {
                yield Err(ChatError::EmptyQuestion);
                return;
            }
            if cancel.is_cancelled() {
                yield Err(ChatError::Cancelled);
                return;
            }

            let request = self.build_request(session, question, profile);
            tracing::info!(
                model = %session.model_id,
                history = self.history.len(),
                question_bytes = question.len(),
                "Chat turn started"
            );

            let mut chunks = transport.generate_streaming(request);
            let mut answer = String::new();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    next = chunks.next() => Some(next),
                };

                match next {
                    None => {
                        tracing::debug!(model = %session.model_id, "Chat turn cancelled");
                        yield Err(ChatError::Cancelled);
                        return;
                    }
                    Some(None) => break,
                    Some(Some(Err(e))) => {
                        tracing::warn!(model = %session.model_id, error = %e, "Chat turn failed");
                        yield Err(ChatError::Transport(e));
                        return;
                    }
                    Some(Some(Ok(chunk))) => {
                        let finished = chunk.is_finished();
                        if !chunk.text.is_empty() {
                            answer.push_str(&chunk.text);
                            yield Ok(ChatStreamEvent::Token { text: chunk.text });
                        }
                        if finished {
                            break;
                        }
                    }
                }
            }
            drop(chunks);

            self.record_exchange(question, &answer);
            tracing::info!(
                model = %session.model_id,
                answer_bytes = answer.len(),
                "Chat turn finished"
            );
            yield Ok(ChatStreamEvent::Done { full_text: answer });
        }
    }
}
