use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{NotificationBridge, NotifyError, OfferNotice};
use crate::dispatch::JobDispatchState;

/// Bridge that only writes offers to the log. Used when push delivery is off.
#[derive(Debug, Default)]
pub struct LogBridge {
    tokens: RwLock<HashMap<String, String>>,
}

impl LogBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn token_for(&self, contractor_id: &str) -> Option<String> {
        self.tokens.read().await.get(contractor_id).cloned()
    }
}

#[async_trait]
impl NotificationBridge for LogBridge {
    async fn notify_offer(&self, notice: &OfferNotice) -> Result<Option<String>, NotifyError> {
        tracing::info!(
            assignment_id = %notice.assignment.id,
            job_id = %notice.assignment.job_id,
            contractor_id = %notice.assignment.contractor_id,
            round = notice.assignment.dispatch_round,
            "{}",
            notice.body()
        );
        Ok(None)
    }

    async fn register_token(&self, contractor_id: &str, token: &str) -> Result<(), NotifyError> {
        self.tokens
            .write()
            .await
            .insert(contractor_id.to_string(), token.to_string());
        Ok(())
    }

    async fn dispatch_exhausted(&self, state: &JobDispatchState) -> Result<(), NotifyError> {
        tracing::warn!(
            job_id = %state.job_id,
            rounds = state.current_round,
            "Dispatch exhausted, operator follow-up needed"
        );
        Ok(())
    }
}
