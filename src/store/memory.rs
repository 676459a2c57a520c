use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::tables::Tables;
use super::{AssignmentStore, CasOutcome, CloseOutcome, OfferCommit, StatusChange};
use crate::dispatch::{AssignmentStatus, DispatchTerminal, JobAssignment, JobDispatchState};
use crate::error::StoreError;

/// Process-local store. One lock over the whole dataset gives every
/// operation compare-and-swap semantics for free.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records, e.g. history imported from the
    /// older dispatcher that pinged several contractors per round and so left
    /// more than one pending offer per job.
    pub fn with_records(
        states: impl IntoIterator<Item = JobDispatchState>,
        assignments: impl IntoIterator<Item = JobAssignment>,
    ) -> Self {
        Self {
            tables: RwLock::new(Tables::from_records(states, assignments)),
        }
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn get_assignment(&self, id: &str) -> Result<Option<JobAssignment>, StoreError> {
        Ok(self.tables.read().await.assignment(id))
    }

    async fn assignments_for_job(&self, job_id: &str) -> Result<Vec<JobAssignment>, StoreError> {
        Ok(self.tables.read().await.for_job(job_id))
    }

    async fn assignments_for_contractor(
        &self,
        contractor_id: &str,
    ) -> Result<Vec<JobAssignment>, StoreError> {
        Ok(self.tables.read().await.for_contractor(contractor_id))
    }

    async fn expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<JobAssignment>, StoreError> {
        Ok(self.tables.read().await.expired_pending(now))
    }

    async fn get_state(&self, job_id: &str) -> Result<Option<JobDispatchState>, StoreError> {
        Ok(self.tables.read().await.state(job_id))
    }

    async fn list_states(&self) -> Result<Vec<JobDispatchState>, StoreError> {
        Ok(self.tables.read().await.states())
    }

    async fn begin_dispatch(
        &self,
        state: JobDispatchState,
    ) -> Result<JobDispatchState, StoreError> {
        Ok(self.tables.write().await.begin(state).0)
    }

    async fn commit_offer(&self, assignment: JobAssignment) -> Result<OfferCommit, StoreError> {
        Ok(self.tables.write().await.commit_offer(assignment))
    }

    async fn compare_and_swap(
        &self,
        id: &str,
        expected: AssignmentStatus,
        change: StatusChange,
    ) -> Result<CasOutcome, StoreError> {
        Ok(self
            .tables
            .write()
            .await
            .compare_and_swap(id, expected, change))
    }

    async fn close_job(
        &self,
        job_id: &str,
        terminal: DispatchTerminal,
        expected_round: Option<u32>,
        at: DateTime<Utc>,
    ) -> Result<CloseOutcome, StoreError> {
        Ok(self
            .tables
            .write()
            .await
            .close_job(job_id, terminal, expected_round, at))
    }

    async fn record_push_receipt(&self, id: &str, receipt: String) -> Result<(), StoreError> {
        self.tables.write().await.record_push_receipt(id, receipt);
        Ok(())
    }
}
