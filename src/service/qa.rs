use crate::config::FALLBACK_ANSWER;
use crate::db::sqlite::QueryHandle;
use crate::error::TabulaError;
use crate::types::conversation::ChatTurn;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Answers a natural-language question against a populated database.
#[async_trait]
pub trait QaCapability: Send + Sync {
    async fn ask(
        &self,
        question: &str,
        db: &QueryHandle,
        history: &[ChatTurn],
    ) -> Result<String, TabulaError>;
}

/// Boundary in front of a [`QaCapability`]: forwards the question and never fails.
#[derive(Clone)]
pub struct QueryFacade {
    capability: Arc<dyn QaCapability>,
    forward_history: bool,
}

impl QueryFacade {
    pub fn new(capability: Arc<dyn QaCapability>, forward_history: bool) -> Self {
        Self {
            capability,
            forward_history,
        }
    }

    /// The capability's answer verbatim, or [`FALLBACK_ANSWER`] if it errs or says nothing.
    pub async fn answer(&self, question: &str, db: &QueryHandle, history: &[ChatTurn]) -> String {
        let history = if self.forward_history { history } else { &[] };
        debug!(history = history.len(), "forwarding question to QA capability");

        match self.capability.ask(question, db, history).await {
            Ok(answer) if !answer.trim().is_empty() => answer,
            Ok(_) => {
                warn!("QA capability returned an empty answer");
                FALLBACK_ANSWER.to_string()
            }
            Err(e) => {
                warn!(error = %e, "QA capability failed");
                FALLBACK_ANSWER.to_string()
            }
        }
    }
}
