use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::assignment::DispatchRequest;

/// How a dispatch session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DispatchTerminal {
    /// A contractor accepted. Carries the winner.
    #[serde(rename_all = "camelCase")]
    Assigned {
        contractor_id: String,
        assignment_id: String,
    },
    /// No candidates left to offer the job to.
    Exhausted,
    /// The job owner withdrew the job mid-dispatch.
    Cancelled,
}

impl fmt::Display for DispatchTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchTerminal::Assigned { contractor_id, .. } => {
                write!(f, "assigned to {contractor_id}")
            }
            DispatchTerminal::Exhausted => write!(f, "exhausted"),
            DispatchTerminal::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Coarse phase of a job's dispatch session.
///
/// DISPATCHING → ASSIGNED | EXHAUSTED | CANCELLED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchPhase {
    Dispatching,
    Assigned,
    Exhausted,
    Cancelled,
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchPhase::Dispatching => write!(f, "DISPATCHING"),
            DispatchPhase::Assigned => write!(f, "ASSIGNED"),
            DispatchPhase::Exhausted => write!(f, "EXHAUSTED"),
            DispatchPhase::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Per-job bookkeeping for an active (or finished) dispatch session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDispatchState {
    pub job_id: String,
    pub request: DispatchRequest,
    /// Highest `dispatch_round` issued so far. Zero before the first offer.
    pub current_round: u32,
    pub offered_contractor_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<DispatchTerminal>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl JobDispatchState {
    pub fn new(request: DispatchRequest, now: DateTime<Utc>) -> Self {
        Self {
            job_id: request.job_id.clone(),
            request,
            current_round: 0,
            offered_contractor_ids: BTreeSet::new(),
            terminal: None,
            started_at: now,
            settled_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn phase(&self) -> DispatchPhase {
        match &self.terminal {
            None => DispatchPhase::Dispatching,
            Some(DispatchTerminal::Assigned { .. }) => DispatchPhase::Assigned,
            Some(DispatchTerminal::Exhausted) => DispatchPhase::Exhausted,
            Some(DispatchTerminal::Cancelled) => DispatchPhase::Cancelled,
        }
    }

    pub fn has_offered(&self, contractor_id: &str) -> bool {
        self.offered_contractor_ids.contains(contractor_id)
    }

    pub fn winner(&self) -> Option<&str> {
        match &self.terminal {
            Some(DispatchTerminal::Assigned { contractor_id, .. }) => Some(contractor_id),
            _ => None,
        }
    }
}
