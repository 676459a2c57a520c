use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::assignment::{AcceptanceWindow, AssignmentStatus, DispatchRequest, JobAssignment};
use super::state::{DispatchTerminal, JobDispatchState};
use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::locator::ContractorLocator;
use crate::notify::{NotificationBridge, OfferNotice};
use crate::store::{AssignmentStore, CloseOutcome, OfferCommit};

/// Re-reads allowed when another actor keeps moving the job's round.
const MAX_COMMIT_ATTEMPTS: usize = 4;

/// Timing and round limits for a dispatch session.
#[derive(Debug, Clone, Default)]
pub struct DispatchPolicy {
    pub window: AcceptanceWindow,
    /// Offers allowed per job before it counts as exhausted. `None` = no cap.
    pub max_rounds: Option<u32>,
}

impl From<&DispatchConfig> for DispatchPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            window: config.acceptance_window.clone(),
            max_rounds: config.max_rounds,
        }
    }
}

/// What a successful `dispatch` call found or did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "assignment", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A new pending offer was created.
    Offered(JobAssignment),
    /// An offer is already out. Nothing was created.
    Outstanding(JobAssignment),
    /// The job already has a winner.
    Assigned(JobAssignment),
}

impl DispatchOutcome {
    pub fn assignment(&self) -> &JobAssignment {
        match self {
            DispatchOutcome::Offered(a)
            | DispatchOutcome::Outstanding(a)
            | DispatchOutcome::Assigned(a) => a,
        }
    }

    pub fn into_assignment(self) -> JobAssignment {
        match self {
            DispatchOutcome::Offered(a)
            | DispatchOutcome::Outstanding(a)
            | DispatchOutcome::Assigned(a) => a,
        }
    }

    pub fn is_new_offer(&self) -> bool {
        matches!(self, DispatchOutcome::Offered(_))
    }
}

/// The only component that creates offers and advances rounds.
pub struct DispatchCoordinator {
    store: Arc<dyn AssignmentStore>,
    locator: Arc<dyn ContractorLocator>,
    bridge: Arc<dyn NotificationBridge>,
    clock: Arc<dyn Clock>,
    policy: DispatchPolicy,
    background: TaskTracker,
}

impl DispatchCoordinator {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        locator: Arc<dyn ContractorLocator>,
        bridge: Arc<dyn NotificationBridge>,
        clock: Arc<dyn Clock>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            store,
            locator,
            bridge,
            clock,
            policy,
            background: TaskTracker::new(),
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Run `task` off the caller's path, tracked so [`settle`](Self::settle) can wait for it.
    pub(crate) fn spawn_background<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.background.spawn(task)
    }

    /// Wait for notifications and re-dispatches started so far.
    pub async fn settle(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    /// Open a dispatch session for the job, or return the one already open.
    pub async fn begin(&self, request: DispatchRequest) -> Result<JobDispatchState, DispatchError> {
        let state = JobDispatchState::new(request, self.clock.now());
        Ok(self.store.begin_dispatch(state).await?)
    }

    /// Offer the job to the next candidate.
    ///
    /// Re-entrant: while an offer is pending, or once the job has a winner,
    /// the existing assignment is returned and nothing is created.
    pub async fn dispatch(&self, job_id: &str) -> Result<DispatchOutcome, DispatchError> {
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let state = self
                .store
                .get_state(job_id)
                .await?
                .ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;

            match &state.terminal {
                Some(DispatchTerminal::Assigned { assignment_id, .. }) => {
                    let winner = self
                        .store
                        .get_assignment(assignment_id)
                        .await?
                        .ok_or_else(|| DispatchError::AssignmentNotFound(assignment_id.clone()))?;
                    return Ok(DispatchOutcome::Assigned(winner));
                }
                Some(DispatchTerminal::Exhausted) => {
                    return Err(DispatchError::Exhausted {
                        job_id: job_id.to_string(),
                        rounds: state.current_round,
                    });
                }
                Some(terminal @ DispatchTerminal::Cancelled) => {
                    return Err(DispatchError::JobClosed {
                        job_id: job_id.to_string(),
                        terminal: terminal.clone(),
                    });
                }
                None => {}
            }

            if let Some(open) = self.outstanding_offer(job_id).await? {
                return Ok(DispatchOutcome::Outstanding(open));
            }

            let at_cap = self
                .policy
                .max_rounds
                .is_some_and(|max| state.current_round >= max);
            let candidate = if at_cap {
                None
            } else {
                self.locator
                    .next_candidate(&state.request, &state.offered_contractor_ids)
                    .await?
            };

            let Some(candidate) = candidate else {
                if self.exhaust(&state).await? {
                    return Err(DispatchError::Exhausted {
                        job_id: job_id.to_string(),
                        rounds: state.current_round,
                    });
                }
                continue;
            };

            let now = self.clock.now();
            let offer = JobAssignment::offer(
                job_id,
                &candidate.contractor_id,
                state.current_round + 1,
                candidate.distance_miles,
                now,
                self.policy.window.for_urgency(state.request.urgency),
            )?;

            match self.store.commit_offer(offer).await? {
                OfferCommit::Created(assignment) => {
                    tracing::info!(
                        job_id,
                        assignment_id = %assignment.id,
                        contractor_id = %assignment.contractor_id,
                        round = assignment.dispatch_round,
                        expires_at = %assignment.expires_at,
                        distance_miles = candidate.distance_miles,
                        "Offer created"
                    );
                    self.spawn_notify(&state.request, assignment.clone());
                    return Ok(DispatchOutcome::Offered(assignment));
                }
                OfferCommit::Stale { current_round } => {
                    tracing::debug!(
                        job_id,
                        attempted_round = state.current_round + 1,
                        current_round,
                        "Offer lost to a concurrent dispatch, re-reading"
                    );
                }
                OfferCommit::Closed(terminal) => {
                    tracing::debug!(job_id, %terminal, "Job closed while dispatching");
                }
                OfferCommit::Missing => {
                    return Err(DispatchError::JobNotFound(job_id.to_string()));
                }
            }
        }

        if let Some(open) = self.outstanding_offer(job_id).await? {
            return Ok(DispatchOutcome::Outstanding(open));
        }
        Err(DispatchError::Contended(job_id.to_string()))
    }

    async fn outstanding_offer(&self, job_id: &str) -> Result<Option<JobAssignment>, DispatchError> {
        let offers = self.store.assignments_for_job(job_id).await?;
        Ok(offers
            .into_iter()
            .rev()
            .find(|a| a.status == AssignmentStatus::Pending))
    }

    /// Close the job as exhausted if nobody advanced it meanwhile.
    /// Returns false when the caller should re-read and try again.
    async fn exhaust(&self, state: &JobDispatchState) -> Result<bool, DispatchError> {
        let outcome = self
            .store
            .close_job(
                &state.job_id,
                DispatchTerminal::Exhausted,
                Some(state.current_round),
                self.clock.now(),
            )
            .await?;

        match outcome {
            CloseOutcome::Closed { .. } => {
                tracing::warn!(
                    job_id = %state.job_id,
                    rounds = state.current_round,
                    offered = state.offered_contractor_ids.len(),
                    "Dispatch exhausted, escalating"
                );
                self.spawn_escalation(state.clone());
                Ok(true)
            }
            CloseOutcome::AlreadyClosed(DispatchTerminal::Exhausted) => Ok(true),
            CloseOutcome::AlreadyClosed(_) | CloseOutcome::RoundMoved { .. } => Ok(false),
            CloseOutcome::Missing => Err(DispatchError::JobNotFound(state.job_id.clone())),
        }
    }

    // Persist-then-notify: the offer is already durable when this runs.
    fn spawn_notify(&self, request: &DispatchRequest, assignment: JobAssignment) {
        let bridge = Arc::clone(&self.bridge);
        let store = Arc::clone(&self.store);
        let notice = OfferNotice {
            assignment,
            job_type: request.job_type.clone(),
            estimated_value: request.estimated_value,
        };

        self.spawn_background(async move {
            let assignment_id = notice.assignment.id.clone();
            match bridge.notify_offer(&notice).await {
                Ok(Some(ticket)) => {
                    if let Err(e) = store.record_push_receipt(&assignment_id, ticket).await {
                        tracing::warn!(%assignment_id, error = %e, "Could not record push receipt");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        %assignment_id,
                        contractor_id = %notice.assignment.contractor_id,
                        error = %e,
                        "Offer notification failed, contractor can still poll"
                    );
                }
            }
        });
    }

    fn spawn_escalation(&self, state: JobDispatchState) {
        let bridge = Arc::clone(&self.bridge);
        self.spawn_background(async move {
            if let Err(e) = bridge.dispatch_exhausted(&state).await {
                tracing::warn!(job_id = %state.job_id, error = %e, "Escalation hook failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use tokio::sync::mpsc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::{GeoPoint, Urgency};
    use crate::locator::{Availability, ContractorProfile, RosterLocator};
    use crate::notify::NotifyError;
    use crate::store::{MemoryStore, StatusChange};

    /// Bridge that reports every offer on a channel, optionally failing.
    struct ChannelBridge {
        tx: mpsc::UnboundedSender<OfferNotice>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationBridge for ChannelBridge {
        async fn notify_offer(&self, notice: &OfferNotice) -> Result<Option<String>, NotifyError> {
            let _ = self.tx.send(notice.clone());
            if self.fail {
                Err(NotifyError::ApiError {
                    status: 503,
                    message: "push down".into(),
                })
            } else {
                Ok(Some(format!("ticket-{}", notice.assignment.dispatch_round)))
            }
        }

        async fn register_token(&self, _: &str, _: &str) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    fn roster(ids: &[&str]) -> RosterLocator {
        let contractors = ids
            .iter()
            .enumerate()
            .map(|(i, id)| ContractorProfile {
                id: id.to_string(),
                name: id.to_string(),
                // Each one a bit further out than the last.
                lat: 30.0 + 0.1 * (i as f64 + 1.0),
                lng: -97.0,
                rating: 4.5,
                completed_jobs: 0,
                availability: Availability::Available,
                verified: true,
            })
            .collect();
        RosterLocator::new(contractors, 100.0)
    }

    fn request(job_id: &str) -> DispatchRequest {
        DispatchRequest {
            job_id: job_id.into(),
            location: GeoPoint {
                lat: 30.0,
                lng: -97.0,
            },
            job_type: "Plumbing".into(),
            estimated_value: 350.0,
            urgency: Urgency::Normal,
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: ManualClock,
        coordinator: Arc<DispatchCoordinator>,
        offers: mpsc::UnboundedReceiver<OfferNotice>,
    }

    fn fixture(ids: &[&str], policy: DispatchPolicy, fail_notify: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc::now());
        let (tx, offers) = mpsc::unbounded_channel();
        let coordinator = Arc::new(DispatchCoordinator::new(
            store.clone(),
            Arc::new(roster(ids)),
            Arc::new(ChannelBridge {
                tx,
                fail: fail_notify,
            }),
            Arc::new(clock.clone()),
            policy,
        ));
        Fixture {
            store,
            clock,
            coordinator,
            offers,
        }
    }

    async fn reject(store: &MemoryStore, id: &str) {
        store
            .compare_and_swap(
                id,
                AssignmentStatus::Pending,
                StatusChange::new(AssignmentStatus::Rejected, Utc::now()),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_offer_goes_to_best_candidate_at_round_one() {
        let mut fx = fixture(&["c1", "c2"], DispatchPolicy::default(), false);
        fx.coordinator.begin(request("j1")).await.unwrap();

        let outcome = fx.coordinator.dispatch("j1").await.unwrap();
        assert!(outcome.is_new_offer());
        let a = outcome.assignment();
        assert_eq!(a.contractor_id, "c1");
        assert_eq!(a.dispatch_round, 1);
        assert_eq!(a.status, AssignmentStatus::Pending);
        assert_eq!(a.expires_at, fx.clock.now() + Duration::minutes(3));

        let state = fx.store.get_state("j1").await.unwrap().unwrap();
        assert_eq!(state.current_round, 1);
        assert!(state.has_offered("c1"));

        let notice = tokio::time::timeout(StdDuration::from_secs(1), fx.offers.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.assignment.id, a.id);

        fx.coordinator.settle().await;
        let stored = fx.store.get_assignment(&a.id).await.unwrap().unwrap();
        assert_eq!(stored.push_receipt.as_deref(), Some("ticket-1"));
        assert_eq!(stored.status, AssignmentStatus::Pending);
    }

    #[tokio::test]
    async fn rounds_are_contiguous_and_contractors_never_repeat() {
        let fx = fixture(&["c1", "c2", "c3"], DispatchPolicy::default(), false);
        fx.coordinator.begin(request("j1")).await.unwrap();

        let mut seen = BTreeSet::new();
        for expected_round in 1..=3 {
            let outcome = fx.coordinator.dispatch("j1").await.unwrap();
            let a = outcome.into_assignment();
            assert_eq!(a.dispatch_round, expected_round);
            assert!(seen.insert(a.contractor_id.clone()), "re-offered {}", a.contractor_id);
            reject(&fx.store, &a.id).await;
        }

        let rounds: Vec<u32> = fx
            .store
            .assignments_for_job("j1")
            .await
            .unwrap()
            .iter()
            .map(|a| a.dispatch_round)
            .collect();
        assert_eq!(rounds, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn dispatch_while_offer_pending_is_a_no_op() {
        let fx = fixture(&["c1", "c2"], DispatchPolicy::default(), false);
        fx.coordinator.begin(request("j1")).await.unwrap();

        let first = fx.coordinator.dispatch("j1").await.unwrap();
        let again = fx.coordinator.dispatch("j1").await.unwrap();
        assert_eq!(again, DispatchOutcome::Outstanding(first.assignment().clone()));
        assert_eq!(fx.store.assignments_for_job("j1").await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redispatch_creates_one_offer() {
        let fx = fixture(&["c1", "c2", "c3"], DispatchPolicy::default(), false);
        fx.coordinator.begin(request("j1")).await.unwrap();
        let first = fx.coordinator.dispatch("j1").await.unwrap();
        reject(&fx.store, &first.assignment().id).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&fx.coordinator);
            handles.push(tokio::spawn(async move { coordinator.dispatch("j1").await }));
        }
        let mut ids = BTreeSet::new();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.assignment().dispatch_round, 2);
            ids.insert(outcome.assignment().id.clone());
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(fx.store.assignments_for_job("j1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn exhaustion_is_terminal() {
        let fx = fixture(&["c1"], DispatchPolicy::default(), false);
        fx.coordinator.begin(request("j1")).await.unwrap();
        let first = fx.coordinator.dispatch("j1").await.unwrap();
        reject(&fx.store, &first.assignment().id).await;

        let err = fx.coordinator.dispatch("j1").await.unwrap_err();
        assert!(matches!(err, DispatchError::Exhausted { rounds: 1, .. }));
        let state = fx.store.get_state("j1").await.unwrap().unwrap();
        assert_eq!(state.terminal, Some(DispatchTerminal::Exhausted));

        let err = fx.coordinator.dispatch("j1").await.unwrap_err();
        assert!(matches!(err, DispatchError::Exhausted { .. }));
        assert_eq!(fx.store.assignments_for_job("j1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn max_rounds_caps_the_session() {
        let policy = DispatchPolicy {
            max_rounds: Some(2),
            ..Default::default()
        };
        let fx = fixture(&["c1", "c2", "c3"], policy, false);
        fx.coordinator.begin(request("j1")).await.unwrap();
        for _ in 0..2 {
            let a = fx.coordinator.dispatch("j1").await.unwrap().into_assignment();
            reject(&fx.store, &a.id).await;
        }
        let err = fx.coordinator.dispatch("j1").await.unwrap_err();
        assert!(matches!(err, DispatchError::Exhausted { rounds: 2, .. }));
    }

    #[tokio::test]
    async fn notification_failure_keeps_the_offer() {
        let mut fx = fixture(&["c1"], DispatchPolicy::default(), true);
        fx.coordinator.begin(request("j1")).await.unwrap();
        let a = fx.coordinator.dispatch("j1").await.unwrap().into_assignment();

        // Wait for the delivery attempt to happen.
        tokio::time::timeout(StdDuration::from_secs(1), fx.offers.recv())
            .await
            .unwrap()
            .unwrap();
        let stored = fx.store.get_assignment(&a.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::Pending);
        assert!(stored.push_receipt.is_none());
    }

    #[tokio::test]
    async fn urgency_picks_the_window() {
        let fx = fixture(&["c1"], DispatchPolicy::default(), false);
        let mut req = request("j1");
        req.urgency = Urgency::Emergency;
        fx.coordinator.begin(req).await.unwrap();
        let a = fx.coordinator.dispatch("j1").await.unwrap().into_assignment();
        assert_eq!(a.expires_at - a.created_at, Duration::minutes(1));
    }

    #[tokio::test]
    async fn oversized_window_fails_without_offering() {
        let policy = DispatchPolicy {
            window: AcceptanceWindow::uniform(100_000_000_000_000),
            max_rounds: None,
        };
        let fx = fixture(&["c1"], policy, false);
        fx.coordinator.begin(request("j1")).await.unwrap();

        let err = fx.coordinator.dispatch("j1").await.unwrap_err();
        assert!(matches!(err, DispatchError::WindowOutOfRange { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
        assert!(fx.store.assignments_for_job("j1").await.unwrap().is_empty());
        assert_eq!(fx.store.get_state("j1").await.unwrap().unwrap().current_round, 0);
    }

    struct DownLocator;

    #[async_trait]
    impl ContractorLocator for DownLocator {
        async fn next_candidate(
            &self,
            _: &DispatchRequest,
            _: &BTreeSet<String>,
        ) -> Result<Option<crate::locator::Candidate>, DispatchError> {
            Err(DispatchError::Locator("roster service unreachable".into()))
        }
    }

    #[tokio::test]
    async fn locator_failure_leaves_job_open() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = DispatchCoordinator::new(
            store.clone(),
            Arc::new(DownLocator),
            Arc::new(crate::notify::LogBridge::new()),
            Arc::new(ManualClock::new(Utc::now())),
            DispatchPolicy::default(),
        );
        coordinator.begin(request("j1")).await.unwrap();

        let err = coordinator.dispatch("j1").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
        let state = store.get_state("j1").await.unwrap().unwrap();
        assert!(state.terminal.is_none());
        assert_eq!(state.current_round, 0);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let fx = fixture(&["c1"], DispatchPolicy::default(), false);
        let err = fx.coordinator.dispatch("ghost").await.unwrap_err();
        assert!(matches!(err, DispatchError::JobNotFound(ref j) if j == "ghost"));
    }

    #[tokio::test]
    async fn cancelled_job_is_closed() {
        let fx = fixture(&["c1", "c2"], DispatchPolicy::default(), false);
        fx.coordinator.begin(request("j1")).await.unwrap();
        fx.coordinator.dispatch("j1").await.unwrap();
        fx.store
            .close_job("j1", DispatchTerminal::Cancelled, None, Utc::now())
            .await
            .unwrap();

        let err = fx.coordinator.dispatch("j1").await.unwrap_err();
        assert!(matches!(err, DispatchError::JobClosed { .. }));
    }
}
