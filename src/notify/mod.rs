pub mod error;
pub mod expo;
pub mod log;
pub mod types;

pub use error::NotifyError;
pub use expo::ExpoPushBridge;
pub use log::LogBridge;
pub use types::{OfferNotice, PushMessage, RetryConfig};

use async_trait::async_trait;

use crate::dispatch::JobDispatchState;

/// Out-of-band delivery of offers to contractors.
///
/// Best effort only. The store stays the source of truth and a contractor who
/// never hears about an offer can still find it by polling.
#[async_trait]
pub trait NotificationBridge: Send + Sync {
    /// Tell the offered contractor about `notice`. Returns the delivery
    /// ticket id when the transport hands one back.
    async fn notify_offer(&self, notice: &OfferNotice) -> Result<Option<String>, NotifyError>;

    async fn register_token(&self, contractor_id: &str, token: &str) -> Result<(), NotifyError>;

    /// Escalation hook for a job that ran out of candidates.
    async fn dispatch_exhausted(&self, _state: &JobDispatchState) -> Result<(), NotifyError> {
        Ok(())
    }
}
