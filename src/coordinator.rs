use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// Keeps at most one extraction active per selection scope.
///
/// `begin` cancels whatever run was started before it, so selecting a new
/// message aborts the extraction of the previous one. Runs themselves share
/// no state; this is purely a cancellation handoff.
#[derive(Debug, Default)]
pub struct ExtractionCoordinator {
    current: Mutex<Option<CancellationToken>>,
}

impl ExtractionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the previous run (if any) and hand out a token for a new one.
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = current.replace(token.clone()) {
                if !previous.is_cancelled() {
                    tracing::debug!("Cancelling previous extraction");
                    previous.cancel();
                }
            }
        }
        token
    }

    /// Cancel the active run. Safe to call when nothing is running.
    pub fn cancel_current(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(token) = current.take() {
                token.cancel();
            }
        }
    }

    /// True while the most recently begun run has not been cancelled.
    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .ok()
            .and_then(|current| current.as_ref().map(|t| !t.is_cancelled()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_cancels_previous_run() {
        let coordinator = ExtractionCoordinator::new();
        let first = coordinator.begin();
        assert!(coordinator.is_active());

        let second = coordinator.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(coordinator.is_active());
    }

    #[test]
    fn cancel_current_cancels_and_clears() {
        let coordinator = ExtractionCoordinator::new();
        let token = coordinator.begin();

        coordinator.cancel_current();
        assert!(token.is_cancelled());
        assert!(!coordinator.is_active());
    }

    #[test]
    fn cancel_without_run_is_noop() {
        let coordinator = ExtractionCoordinator::new();
        coordinator.cancel_current();
        assert!(!coordinator.is_active());
    }

    #[test]
    fn externally_cancelled_token_is_not_active() {
        let coordinator = ExtractionCoordinator::new();
        let token = coordinator.begin();
        token.cancel();
        assert!(!coordinator.is_active());
    }

    #[tokio::test]
    async fn new_selection_stops_running_extraction() {
        use crate::foundry::{GenerationOptions, MockFoundry, StreamChunk};
        use crate::model_manager::ModelSession;
        use crate::pipeline::extraction::{extract, ExtractionError};
        use futures_util::StreamExt;

        let mock = MockFoundry::new().with_stalled_reply(vec![StreamChunk::text("{")]);
        let session = ModelSession {
            model_id: "phi-4-mini".into(),
            device_type: "CPU".into(),
            endpoint: "http://localhost:5273".into(),
            api_key: "OPENAI_API_KEY".into(),
            options: GenerationOptions::default(),
        };
        let coordinator = ExtractionCoordinator::new();

        let updates = extract(&mock, &session, "first message", coordinator.begin());
        tokio::pin!(updates);
        assert!(updates.next().await.unwrap().is_ok());

        let _next = coordinator.begin();
        assert_eq!(updates.next().await, Some(Err(ExtractionError::Cancelled)));
    }
}
