use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::assignment::{AssignmentStatus, JobAssignment};
use super::coordinator::{DispatchCoordinator, DispatchOutcome};
use crate::clock::Clock;
use crate::error::DispatchError;
use crate::store::{AssignmentStore, CasOutcome, StatusChange};

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired: Vec<JobAssignment>,
    pub redispatched: Vec<JobAssignment>,
    pub exhausted: Vec<String>,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.expired.is_empty() && self.redispatched.is_empty() && self.exhausted.is_empty()
    }
}

/// Periodic expiry of unanswered offers.
///
/// Safe to overlap with itself and with the gate: every transition is a CAS
/// and every re-dispatch goes through the coordinator's commit.
pub struct ExpiryWatcher {
    store: Arc<dyn AssignmentStore>,
    coordinator: Arc<DispatchCoordinator>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ExpiryWatcher {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        coordinator: Arc<DispatchCoordinator>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            coordinator,
            clock,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn sweep(&self) -> Result<SweepReport, DispatchError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for stale in self.store.expired_pending(now).await? {
            let change = StatusChange::new(AssignmentStatus::Expired, now);
            match self
                .store
                .compare_and_swap(&stale.id, AssignmentStatus::Pending, change)
                .await
            {
                Ok(CasOutcome::Applied(expired)) => {
                    tracing::info!(
                        assignment_id = %expired.id,
                        job_id = %expired.job_id,
                        contractor_id = %expired.contractor_id,
                        round = expired.dispatch_round,
                        "Offer expired"
                    );
                    report.expired.push(expired);
                }
                // Someone else answered or expired it first.
                Ok(_) => {}
                Err(e) => tracing::warn!(assignment_id = %stale.id, error = %e, "Expiry failed"),
            }
        }

        // Any open job with nothing outstanding gets its next round. This also
        // picks up jobs whose re-dispatch was lost to a crash.
        let open_jobs: BTreeSet<String> = self
            .store
            .list_states()
            .await?
            .into_iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.job_id)
            .collect();

        for job_id in open_jobs {
            let idle = self
                .store
                .assignments_for_job(&job_id)
                .await?
                .iter()
                .all(|a| a.status != AssignmentStatus::Pending);
            if !idle {
                continue;
            }

            match self.coordinator.dispatch(&job_id).await {
                Ok(DispatchOutcome::Offered(next)) => report.redispatched.push(next),
                Ok(_) => {}
                Err(DispatchError::Exhausted { .. }) => report.exhausted.push(job_id),
                Err(e) => tracing::warn!(%job_id, error = %e, "Sweep re-dispatch failed"),
            }
        }

        if report.is_idle() {
            tracing::debug!("Sweep found nothing to do");
        } else {
            tracing::info!(
                expired = report.expired.len(),
                redispatched = report.redispatched.len(),
                exhausted = report.exhausted.len(),
                "Sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep on every tick until `cancel` fires, handing each report to `on_sweep`.
    pub async fn run<F>(self: Arc<Self>, cancel: CancellationToken, mut on_sweep: F)
    where
        F: FnMut(&SweepReport),
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), "Expiry watcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) => on_sweep(&report),
                        Err(e) => tracing::error!(error = %e, "Sweep failed"),
                    }
                }
            }
        }
        tracing::info!("Expiry watcher stopped");
    }
}
