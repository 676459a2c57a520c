use std::sync::Arc;

use tokio::task::JoinHandle;

use super::assignment::{AssignmentStatus, JobAssignment};
use super::coordinator::{DispatchCoordinator, DispatchOutcome};
use crate::clock::Clock;
use crate::error::DispatchError;
use crate::store::{AssignmentStore, CasOutcome, StatusChange};

/// The recorded rejection plus the follow-up dispatch it started.
#[derive(Debug)]
pub struct Rejection {
    pub assignment: JobAssignment,
    /// Next-round dispatch. The caller may drop it; the task keeps running.
    pub redispatch: JoinHandle<Result<DispatchOutcome, DispatchError>>,
}

/// Contractor responses. The only writer of `accepted`.
pub struct AcceptanceGate {
    store: Arc<dyn AssignmentStore>,
    coordinator: Arc<DispatchCoordinator>,
    clock: Arc<dyn Clock>,
}

impl AcceptanceGate {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        coordinator: Arc<DispatchCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            coordinator,
            clock,
        }
    }

    pub async fn accept(&self, assignment_id: &str) -> Result<JobAssignment, DispatchError> {
        let accepted = self.respond(assignment_id, AssignmentStatus::Accepted).await?;

        tracing::info!(
            assignment_id,
            job_id = %accepted.job_id,
            contractor_id = %accepted.contractor_id,
            round = accepted.dispatch_round,
            "Offer accepted"
        );
        self.supersede_siblings(&accepted).await;
        Ok(accepted)
    }

    pub async fn reject(&self, assignment_id: &str) -> Result<Rejection, DispatchError> {
        let rejected = self.respond(assignment_id, AssignmentStatus::Rejected).await?;
        tracing::info!(
            assignment_id,
            job_id = %rejected.job_id,
            contractor_id = %rejected.contractor_id,
            round = rejected.dispatch_round,
            "Offer rejected, re-dispatching"
        );

        let coordinator = Arc::clone(&self.coordinator);
        let job_id = rejected.job_id.clone();
        let redispatch = self.coordinator.spawn_background(async move {
            let outcome = coordinator.dispatch(&job_id).await;
            if let Err(e) = &outcome {
                tracing::warn!(job_id = %job_id, error = %e, "Re-dispatch after rejection failed");
            }
            outcome
        });

        Ok(Rejection {
            assignment: rejected,
            redispatch,
        })
    }

    async fn load(&self, assignment_id: &str) -> Result<JobAssignment, DispatchError> {
        self.store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| DispatchError::AssignmentNotFound(assignment_id.to_string()))
    }

    /// Checks then compare-and-swaps `pending -> to`.
    async fn respond(
        &self,
        assignment_id: &str,
        to: AssignmentStatus,
    ) -> Result<JobAssignment, DispatchError> {
        let current = self.load(assignment_id).await?;
        let now = self.clock.now();

        // Time decides expiry, whether or not a sweep has marked it yet.
        if current.status == AssignmentStatus::Expired
            || (current.status == AssignmentStatus::Pending && current.is_expired_at(now))
        {
            return Err(expired(&current));
        }
        if current.status != AssignmentStatus::Pending {
            return Err(conflict(&current));
        }

        let outcome = self
            .store
            .compare_and_swap(
                assignment_id,
                AssignmentStatus::Pending,
                StatusChange::new(to, now),
            )
            .await?;

        match outcome {
            CasOutcome::Applied(assignment) => Ok(assignment),
            CasOutcome::Mismatch(moved) if moved.status == AssignmentStatus::Expired => {
                Err(expired(&moved))
            }
            CasOutcome::Mismatch(moved) => Err(conflict(&moved)),
            CasOutcome::JobClosed(assignment, terminal) => {
                tracing::debug!(
                    assignment_id,
                    job_id = %assignment.job_id,
                    %terminal,
                    "Response to closed job refused"
                );
                Err(DispatchError::JobClosed {
                    job_id: assignment.job_id,
                    terminal,
                })
            }
            CasOutcome::JobMissing(job_id) => Err(DispatchError::JobNotFound(job_id)),
            CasOutcome::Missing => Err(DispatchError::AssignmentNotFound(
                assignment_id.to_string(),
            )),
        }
    }

    // Siblings only exist in legacy data. A leftover one is still refused by
    // the CAS since the job is already settled.
    async fn supersede_siblings(&self, winner: &JobAssignment) {
        let siblings = match self.store.assignments_for_job(&winner.job_id).await {
            Ok(all) => all,
            Err(e) => {
                tracing::warn!(job_id = %winner.job_id, error = %e, "Could not list siblings");
                return;
            }
        };

        let now = self.clock.now();
        for sibling in siblings
            .into_iter()
            .filter(|a| a.id != winner.id && a.status == AssignmentStatus::Pending)
        {
            let change = StatusChange::new(AssignmentStatus::Superseded, now);
            match self
                .store
                .compare_and_swap(&sibling.id, AssignmentStatus::Pending, change)
                .await
            {
                Ok(CasOutcome::Applied(_)) => {
                    tracing::debug!(assignment_id = %sibling.id, "Sibling superseded");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(assignment_id = %sibling.id, error = %e, "Sibling cleanup failed");
                }
            }
        }
    }
}

fn expired(assignment: &JobAssignment) -> DispatchError {
    DispatchError::Expired {
        assignment_id: assignment.id.clone(),
        expires_at: assignment.expires_at,
    }
}

fn conflict(assignment: &JobAssignment) -> DispatchError {
    DispatchError::Conflict {
        assignment_id: assignment.id.clone(),
        status: assignment.status,
    }
}
