//! Boundary operations called by job owners, contractors and the binary.
//!
//! Every call returns a serialisable response. Failures travel as an
//! [`ApiError`] carrying the [`ErrorKind`] so clients can tell "too late"
//! from "offer expired" from "no one left".

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::clock::Clock;
use crate::dispatch::{
    AcceptanceGate, DispatchCoordinator, DispatchOutcome, DispatchPhase, DispatchPolicy,
    DispatchRequest, DispatchTerminal, ExpiryWatcher, JobAssignment, JobDispatchState,
};
use crate::error::{DispatchError, ErrorKind};
use crate::locator::ContractorLocator;
use crate::notify::NotificationBridge;
use crate::store::{AssignmentStore, CloseOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&DispatchError> for ApiError {
    fn from(err: &DispatchError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<JobAssignment>,
    /// When the current offer lapses and the next round may start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_dispatch_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl PingResponse {
    /// A lapsed offer still waiting for a sweep carries no `next_dispatch_at`.
    fn from_result(
        result: Result<DispatchOutcome, DispatchError>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        match result {
            Ok(outcome) => {
                let assignment = outcome.into_assignment();
                let next_dispatch_at = assignment
                    .is_live_at(now)
                    .then_some(assignment.expires_at);
                Self {
                    success: true,
                    assignment: Some(assignment),
                    next_dispatch_at,
                    error: None,
                }
            }
            Err(e) => Self {
                success: false,
                assignment: None,
                next_dispatch_at: None,
                error: Some(ApiError::from(&e)),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<JobAssignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    /// Offers that were pending when the job closed.
    pub superseded: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

/// A job's dispatch session and every offer made in it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub phase: DispatchPhase,
    pub state: JobDispatchState,
    pub assignments: Vec<JobAssignment>,
}

pub struct DispatchApi {
    store: Arc<dyn AssignmentStore>,
    bridge: Arc<dyn NotificationBridge>,
    clock: Arc<dyn Clock>,
    coordinator: Arc<DispatchCoordinator>,
    gate: AcceptanceGate,
}

impl DispatchApi {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        locator: Arc<dyn ContractorLocator>,
        bridge: Arc<dyn NotificationBridge>,
        clock: Arc<dyn Clock>,
        policy: DispatchPolicy,
    ) -> Self {
        let coordinator = Arc::new(DispatchCoordinator::new(
            Arc::clone(&store),
            locator,
            Arc::clone(&bridge),
            Arc::clone(&clock),
            policy,
        ));
        let gate = AcceptanceGate::new(
            Arc::clone(&store),
            Arc::clone(&coordinator),
            Arc::clone(&clock),
        );
        Self {
            store,
            bridge,
            clock,
            coordinator,
            gate,
        }
    }

    pub fn coordinator(&self) -> Arc<DispatchCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Wait for background notifications and re-dispatches to finish.
    pub async fn settle(&self) {
        self.coordinator.settle().await;
    }

    /// A watcher over the same store, coordinator and clock.
    pub fn watcher(&self, interval: Duration) -> ExpiryWatcher {
        ExpiryWatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.clock),
            interval,
        )
    }

    /// Start dispatch for a job, or resume the one already running.
    ///
    /// A request for a job that already has a session reuses the stored
    /// request; location and value are not updated mid-session.
    pub async fn ping(&self, request: DispatchRequest) -> PingResponse {
        let job_id = request.job_id.clone();
        let result = match self.coordinator.begin(request).await {
            Ok(_) => self.coordinator.dispatch(&job_id).await,
            Err(e) => Err(e),
        };
        PingResponse::from_result(result, self.clock.now())
    }

    /// Resume dispatch for a job that already has a session.
    pub async fn ping_job(&self, job_id: &str) -> PingResponse {
        let result = self.coordinator.dispatch(job_id).await;
        PingResponse::from_result(result, self.clock.now())
    }

    pub async fn accept_assignment(&self, assignment_id: &str) -> AcceptResponse {
        match self.gate.accept(assignment_id).await {
            Ok(assignment) => AcceptResponse {
                success: true,
                assignment: Some(assignment),
                error: None,
            },
            Err(e) => AcceptResponse {
                success: false,
                assignment: None,
                error: Some(ApiError::from(&e)),
            },
        }
    }

    /// Returns once the rejection is stored; the next round runs in the background.
    pub async fn reject_assignment(&self, assignment_id: &str) -> RejectResponse {
        match self.gate.reject(assignment_id).await {
            Ok(_rejection) => RejectResponse {
                success: true,
                error: None,
            },
            Err(e) => RejectResponse {
                success: false,
                error: Some(ApiError::from(&e)),
            },
        }
    }

    /// Live offers for a contractor, soonest deadline first.
    pub async fn get_pending_assignments(
        &self,
        contractor_id: &str,
    ) -> Result<Vec<JobAssignment>, DispatchError> {
        let now = self.clock.now();
        let mut pending: Vec<JobAssignment> = self
            .store
            .assignments_for_contractor(contractor_id)
            .await?
            .into_iter()
            .filter(|a| a.is_live_at(now))
            .collect();
        pending.sort_by_key(|a| a.expires_at);
        Ok(pending)
    }

    pub async fn register_push_token(&self, contractor_id: &str, token: &str) -> RegisterResponse {
        match self.bridge.register_token(contractor_id, token).await {
            Ok(()) => {
                tracing::info!(contractor_id, "Push token registered");
                RegisterResponse { success: true }
            }
            Err(e) => {
                tracing::warn!(contractor_id, error = %e, "Push token registration failed");
                RegisterResponse { success: false }
            }
        }
    }

    /// Close a job mid-dispatch. Outstanding offers are superseded and any
    /// later response to them is refused.
    pub async fn cancel_job(&self, job_id: &str) -> CancelResponse {
        let outcome = self
            .store
            .close_job(job_id, DispatchTerminal::Cancelled, None, self.clock.now())
            .await;

        let failed = |e: DispatchError| CancelResponse {
            success: false,
            superseded: Vec::new(),
            error: Some(ApiError::from(&e)),
        };
        match outcome {
            Ok(CloseOutcome::Closed { superseded }) => {
                tracing::info!(job_id, superseded = superseded.len(), "Job cancelled");
                CancelResponse {
                    success: true,
                    superseded,
                    error: None,
                }
            }
            Ok(CloseOutcome::AlreadyClosed(DispatchTerminal::Cancelled)) => CancelResponse {
                success: true,
                superseded: Vec::new(),
                error: None,
            },
            Ok(CloseOutcome::AlreadyClosed(terminal)) => failed(DispatchError::JobClosed {
                job_id: job_id.to_string(),
                terminal,
            }),
            // Only returned when a round is expected, which cancel never passes.
            Ok(CloseOutcome::RoundMoved { .. }) => {
                failed(DispatchError::Contended(job_id.to_string()))
            }
            Ok(CloseOutcome::Missing) => failed(DispatchError::JobNotFound(job_id.to_string())),
            Err(e) => failed(e.into()),
        }
    }

    pub async fn job_report(&self, job_id: &str) -> Result<JobReport, DispatchError> {
        let state = self
            .store
            .get_state(job_id)
            .await?
            .ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;
        let assignments = self.store.assignments_for_job(job_id).await?;
        Ok(JobReport {
            phase: state.phase(),
            state,
            assignments,
        })
    }

    /// Every session in the store, open ones first.
    pub async fn list_jobs(&self) -> Result<Vec<JobDispatchState>, DispatchError> {
        let mut states = self.store.list_states().await?;
        states.sort_by_key(|s| (s.is_terminal(), s.started_at));
        Ok(states)
    }
}
