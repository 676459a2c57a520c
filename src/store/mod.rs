//! Durable keyed storage for assignments and per-job dispatch state.
//!
//! Every status change goes through [`AssignmentStore::compare_and_swap`], keyed
//! by assignment id and the status the caller expects to find. That single
//! primitive is what settles accept-vs-expire and accept-vs-accept races, so an
//! engine is only correct if it applies the check and the write as one step.

mod file;
mod memory;
mod tables;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dispatch::{AssignmentStatus, DispatchTerminal, JobAssignment, JobDispatchState};
use crate::error::StoreError;

/// Target of a conditional status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: AssignmentStatus,
    /// Recorded as the assignment's `responded_at`.
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(status: AssignmentStatus, at: DateTime<Utc>) -> Self {
        Self { status, at }
    }
}

/// Result of [`AssignmentStore::compare_and_swap`].
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The stored status matched and the transition was written.
    Applied(JobAssignment),
    /// Another actor moved the assignment first. Carries what is stored now.
    Mismatch(JobAssignment),
    /// Accept or reject attempted on a job that is already settled.
    JobClosed(JobAssignment, DispatchTerminal),
    /// The assignment's job has no dispatch state.
    JobMissing(String),
    Missing,
}

/// Result of [`AssignmentStore::commit_offer`].
#[derive(Debug, Clone, PartialEq)]
pub enum OfferCommit {
    Created(JobAssignment),
    /// The round already moved, the contractor was already offered, or an
    /// earlier offer is still pending. Nothing was written.
    Stale { current_round: u32 },
    Closed(DispatchTerminal),
    Missing,
}

/// Result of [`AssignmentStore::close_job`].
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    /// Terminal written. Lists the pending offers that were superseded with it.
    Closed { superseded: Vec<String> },
    AlreadyClosed(DispatchTerminal),
    RoundMoved { current_round: u32 },
    Missing,
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn get_assignment(&self, id: &str) -> Result<Option<JobAssignment>, StoreError>;

    /// All offers for a job, ordered by round.
    async fn assignments_for_job(&self, job_id: &str) -> Result<Vec<JobAssignment>, StoreError>;

    async fn assignments_for_contractor(
        &self,
        contractor_id: &str,
    ) -> Result<Vec<JobAssignment>, StoreError>;

    /// Offers still marked `pending` whose deadline is at or before `now`.
    async fn expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<JobAssignment>, StoreError>;

    async fn get_state(&self, job_id: &str) -> Result<Option<JobDispatchState>, StoreError>;

    async fn list_states(&self) -> Result<Vec<JobDispatchState>, StoreError>;

    /// Insert `state` unless the job already has one. Returns whatever is stored afterwards.
    async fn begin_dispatch(&self, state: JobDispatchState)
    -> Result<JobDispatchState, StoreError>;

    /// Create a new offer, advance the job's round and record the contractor as
    /// offered, all in one step. Only writes when `assignment.dispatch_round`
    /// is exactly one past the stored round and no earlier offer is pending.
    async fn commit_offer(&self, assignment: JobAssignment) -> Result<OfferCommit, StoreError>;

    /// Move an assignment from `expected` to `change.status`, only if it is
    /// still `expected` at write time. A change to `accepted` also settles the
    /// job as assigned in the same step.
    async fn compare_and_swap(
        &self,
        id: &str,
        expected: AssignmentStatus,
        change: StatusChange,
    ) -> Result<CasOutcome, StoreError>;

    /// Mark a still-open job exhausted or cancelled and supersede its pending
    /// offers. With `expected_round` set, refuses if the round moved since.
    async fn close_job(
        &self,
        job_id: &str,
        terminal: DispatchTerminal,
        expected_round: Option<u32>,
        at: DateTime<Utc>,
    ) -> Result<CloseOutcome, StoreError>;

    /// Attach the push service's ticket id. Does not touch status.
    async fn record_push_receipt(&self, id: &str, receipt: String) -> Result<(), StoreError>;
}
