use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CasOutcome, CloseOutcome, OfferCommit, StatusChange};
use crate::dispatch::{AssignmentStatus, DispatchTerminal, JobAssignment, JobDispatchState};

/// The whole dataset. Engines wrap it in a lock; every method here runs under
/// that lock, so each one is atomic with respect to the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Tables {
    #[serde(default)]
    assignments: BTreeMap<String, JobAssignment>,
    #[serde(default)]
    jobs: BTreeMap<String, JobDispatchState>,
}

impl Tables {
    pub fn from_records(
        states: impl IntoIterator<Item = JobDispatchState>,
        assignments: impl IntoIterator<Item = JobAssignment>,
    ) -> Self {
        Self {
            assignments: assignments.into_iter().map(|a| (a.id.clone(), a)).collect(),
            jobs: states.into_iter().map(|s| (s.job_id.clone(), s)).collect(),
        }
    }

    pub fn assignment(&self, id: &str) -> Option<JobAssignment> {
        self.assignments.get(id).cloned()
    }

    pub fn for_job(&self, job_id: &str) -> Vec<JobAssignment> {
        let mut found: Vec<JobAssignment> = self
            .assignments
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.dispatch_round);
        found
    }

    pub fn for_contractor(&self, contractor_id: &str) -> Vec<JobAssignment> {
        let mut found: Vec<JobAssignment> = self
            .assignments
            .values()
            .filter(|a| a.contractor_id == contractor_id)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.created_at);
        found
    }

    pub fn expired_pending(&self, now: DateTime<Utc>) -> Vec<JobAssignment> {
        self.assignments
            .values()
            .filter(|a| a.status == AssignmentStatus::Pending && a.is_expired_at(now))
            .cloned()
            .collect()
    }

    pub fn state(&self, job_id: &str) -> Option<JobDispatchState> {
        self.jobs.get(job_id).cloned()
    }

    pub fn states(&self) -> Vec<JobDispatchState> {
        self.jobs.values().cloned().collect()
    }

    /// Returns the stored state and whether it was inserted just now.
    pub fn begin(&mut self, state: JobDispatchState) -> (JobDispatchState, bool) {
        if let Some(existing) = self.jobs.get(&state.job_id) {
            return (existing.clone(), false);
        }
        self.jobs.insert(state.job_id.clone(), state.clone());
        (state, true)
    }

    fn has_pending(&self, job_id: &str) -> bool {
        self.assignments
            .values()
            .any(|a| a.job_id == job_id && a.status == AssignmentStatus::Pending)
    }

    pub fn commit_offer(&mut self, assignment: JobAssignment) -> OfferCommit {
        let has_pending = self.has_pending(&assignment.job_id);
        let Some(state) = self.jobs.get_mut(&assignment.job_id) else {
            return OfferCommit::Missing;
        };
        if let Some(terminal) = &state.terminal {
            return OfferCommit::Closed(terminal.clone());
        }
        if assignment.dispatch_round != state.current_round + 1
            || state.has_offered(&assignment.contractor_id)
            || has_pending
        {
            return OfferCommit::Stale {
                current_round: state.current_round,
            };
        }

        state.current_round = assignment.dispatch_round;
        state
            .offered_contractor_ids
            .insert(assignment.contractor_id.clone());
        self.assignments
            .insert(assignment.id.clone(), assignment.clone());
        OfferCommit::Created(assignment)
    }

    pub fn compare_and_swap(
        &mut self,
        id: &str,
        expected: AssignmentStatus,
        change: StatusChange,
    ) -> CasOutcome {
        let Some(current) = self.assignments.get(id) else {
            return CasOutcome::Missing;
        };
        if current.status != expected {
            return CasOutcome::Mismatch(current.clone());
        }

        let responding = matches!(
            change.status,
            AssignmentStatus::Accepted | AssignmentStatus::Rejected
        );
        if responding {
            let Some(state) = self.jobs.get_mut(&current.job_id) else {
                return CasOutcome::JobMissing(current.job_id.clone());
            };
            if let Some(terminal) = &state.terminal {
                return CasOutcome::JobClosed(current.clone(), terminal.clone());
            }
            if change.status == AssignmentStatus::Accepted {
                state.terminal = Some(DispatchTerminal::Assigned {
                    contractor_id: current.contractor_id.clone(),
                    assignment_id: current.id.clone(),
                });
                state.settled_at = Some(change.at);
            }
        }

        // Checked above; the lookup cannot miss.
        let Some(assignment) = self.assignments.get_mut(id) else {
            return CasOutcome::Missing;
        };
        assignment.status = change.status;
        assignment.responded_at = Some(change.at);
        CasOutcome::Applied(assignment.clone())
    }

    pub fn close_job(
        &mut self,
        job_id: &str,
        terminal: DispatchTerminal,
        expected_round: Option<u32>,
        at: DateTime<Utc>,
    ) -> CloseOutcome {
        let Some(state) = self.jobs.get_mut(job_id) else {
            return CloseOutcome::Missing;
        };
        if let Some(existing) = &state.terminal {
            return CloseOutcome::AlreadyClosed(existing.clone());
        }
        if let Some(round) = expected_round {
            if state.current_round != round {
                return CloseOutcome::RoundMoved {
                    current_round: state.current_round,
                };
            }
        }
        state.terminal = Some(terminal);
        state.settled_at = Some(at);

        let mut superseded = Vec::new();
        for assignment in self.assignments.values_mut() {
            if assignment.job_id == job_id && assignment.status == AssignmentStatus::Pending {
                assignment.status = AssignmentStatus::Superseded;
                assignment.responded_at = Some(at);
                superseded.push(assignment.id.clone());
            }
        }
        CloseOutcome::Closed { superseded }
    }

    /// Returns false when the assignment does not exist.
    pub fn record_push_receipt(&mut self, id: &str, receipt: String) -> bool {
        match self.assignments.get_mut(id) {
            Some(assignment) => {
                assignment.push_receipt = Some(receipt);
                true
            }
            None => false,
        }
    }
}
