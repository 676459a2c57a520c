use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::tables::Tables;
use super::{AssignmentStore, CasOutcome, CloseOutcome, OfferCommit, StatusChange};
use crate::dispatch::{AssignmentStatus, DispatchTerminal, JobAssignment, JobDispatchState};
use crate::error::StoreError;

/// JSON-file backed store.
///
/// Writes apply to a copy of the tables, the copy is flushed to disk
/// (temp file + rename), and only then replaces the in-memory view. A change
/// is never visible to readers before it is durable.
///
/// Atomicity holds within one process. Two processes sharing a file are not
/// coordinated.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl FileStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let tables = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => Tables::default(),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                StoreError::Corrupt(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), "Opened dispatch state file");
        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(tables)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Run `op` against a copy and commit it to disk and memory when
    /// `wrote` says the outcome changed something.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut Tables) -> T,
        wrote: impl FnOnce(&T) -> bool,
    ) -> Result<T, StoreError> {
        let mut guard = self.tables.lock().await;
        let mut next = guard.clone();
        let outcome = op(&mut next);
        if wrote(&outcome) {
            self.persist(&next).await?;
            *guard = next;
        }
        Ok(outcome)
    }
}

#[async_trait]
impl AssignmentStore for FileStore {
    async fn get_assignment(&self, id: &str) -> Result<Option<JobAssignment>, StoreError> {
        Ok(self.tables.lock().await.assignment(id))
    }

    async fn assignments_for_job(&self, job_id: &str) -> Result<Vec<JobAssignment>, StoreError> {
        Ok(self.tables.lock().await.for_job(job_id))
    }

    async fn assignments_for_contractor(
        &self,
        contractor_id: &str,
    ) -> Result<Vec<JobAssignment>, StoreError> {
        Ok(self.tables.lock().await.for_contractor(contractor_id))
    }

    async fn expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<JobAssignment>, StoreError> {
        Ok(self.tables.lock().await.expired_pending(now))
    }

    async fn get_state(&self, job_id: &str) -> Result<Option<JobDispatchState>, StoreError> {
        Ok(self.tables.lock().await.state(job_id))
    }

    async fn list_states(&self) -> Result<Vec<JobDispatchState>, StoreError> {
        Ok(self.tables.lock().await.states())
    }

    async fn begin_dispatch(
        &self,
        state: JobDispatchState,
    ) -> Result<JobDispatchState, StoreError> {
        let (stored, _) = self
            .mutate(|t| t.begin(state), |(_, inserted)| *inserted)
            .await?;
        Ok(stored)
    }

    async fn commit_offer(&self, assignment: JobAssignment) -> Result<OfferCommit, StoreError> {
        self.mutate(
            |t| t.commit_offer(assignment),
            |out| matches!(out, OfferCommit::Created(_)),
        )
        .await
    }

    async fn compare_and_swap(
        &self,
        id: &str,
        expected: AssignmentStatus,
        change: StatusChange,
    ) -> Result<CasOutcome, StoreError> {
        self.mutate(
            |t| t.compare_and_swap(id, expected, change),
            |out| matches!(out, CasOutcome::Applied(_)),
        )
        .await
    }

    async fn close_job(
        &self,
        job_id: &str,
        terminal: DispatchTerminal,
        expected_round: Option<u32>,
        at: DateTime<Utc>,
    ) -> Result<CloseOutcome, StoreError> {
        self.mutate(
            |t| t.close_job(job_id, terminal, expected_round, at),
            |out| matches!(out, CloseOutcome::Closed { .. }),
        )
        .await
    }

    async fn record_push_receipt(&self, id: &str, receipt: String) -> Result<(), StoreError> {
        self.mutate(|t| t.record_push_receipt(id, receipt), |found| *found)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchRequest, GeoPoint, Urgency};
    use chrono::Duration;

    fn state(job_id: &str) -> JobDispatchState {
        JobDispatchState::new(
            DispatchRequest {
                job_id: job_id.into(),
                location: GeoPoint {
                    lat: 30.27,
                    lng: -97.74,
                },
                job_type: "Electrical".into(),
                estimated_value: 420.0,
                urgency: Urgency::Emergency,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch-state.json");

        let offer =
            JobAssignment::offer("j", "c1", 1, 3.2, Utc::now(), Duration::seconds(60)).unwrap();
        {
            let store = FileStore::open(&path).await.unwrap();
            store.begin_dispatch(state("j")).await.unwrap();
            store.commit_offer(offer.clone()).await.unwrap();
            store
                .compare_and_swap(
                    &offer.id,
                    AssignmentStatus::Pending,
                    StatusChange::new(AssignmentStatus::Rejected, Utc::now()),
                )
                .await
                .unwrap();
            store
                .record_push_receipt(&offer.id, "ticket-1".into())
                .await
                .unwrap();
        }

        let reopened = FileStore::open(&path).await.unwrap();
        let stored = reopened.get_assignment(&offer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::Rejected);
        assert_eq!(stored.push_receipt.as_deref(), Some("ticket-1"));
        assert!(stored.responded_at.is_some());

        let job = reopened.get_state("j").await.unwrap().unwrap();
        assert_eq!(job.current_round, 1);
        assert!(job.has_offered("c1"));
        assert_eq!(job.request.urgency, Urgency::Emergency);
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nothing-here.json"))
            .await
            .unwrap();
        assert!(store.list_states().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn failed_cas_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).await.unwrap();
        let out = store
            .compare_and_swap(
                "ghost",
                AssignmentStatus::Pending,
                StatusChange::new(AssignmentStatus::Expired, Utc::now()),
            )
            .await
            .unwrap();
        assert_eq!(out, CasOutcome::Missing);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = FileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
