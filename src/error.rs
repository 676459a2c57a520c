use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::{AssignmentStatus, DispatchTerminal};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Assignment not found: {0}")]
    AssignmentNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Assignment {assignment_id} is already {status}")]
    Conflict {
        assignment_id: String,
        status: AssignmentStatus,
    },

    #[error("Assignment {assignment_id} expired at {expires_at}")]
    Expired {
        assignment_id: String,
        expires_at: DateTime<Utc>,
    },

    #[error("No candidates left for job {job_id} after {rounds} round(s)")]
    Exhausted { job_id: String, rounds: u32 },

    #[error("Job {job_id} is closed ({terminal})")]
    JobClosed {
        job_id: String,
        terminal: DispatchTerminal,
    },

    #[error("Gave up dispatching job {0}: round kept moving under contention")]
    Contended(String),

    #[error("Acceptance window of {window_secs}s is out of range for job {job_id}")]
    WindowOutOfRange { job_id: String, window_secs: i64 },

    #[error("Contractor lookup failed: {0}")]
    Locator(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Collapse into the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::AssignmentNotFound(_) | DispatchError::JobNotFound(_) => {
                ErrorKind::NotFound
            }
            DispatchError::Conflict { .. }
            | DispatchError::JobClosed { .. }
            | DispatchError::Contended(_) => ErrorKind::Conflict,
            DispatchError::Expired { .. } => ErrorKind::Expired,
            DispatchError::Exhausted { .. } => ErrorKind::Exhausted,
            DispatchError::WindowOutOfRange { .. }
            | DispatchError::Locator(_)
            | DispatchError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// What a caller is told went wrong.
///
/// `Expired` is a flavour of `Conflict` reported separately so clients can say
/// "offer expired" instead of a generic "too late".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Expired,
    Exhausted,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Expired => write!(f, "expired"),
            ErrorKind::Exhausted => write!(f, "exhausted"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt store: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_caller_taxonomy() {
        assert_eq!(
            DispatchError::AssignmentNotFound("a".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DispatchError::Conflict {
                assignment_id: "a".into(),
                status: AssignmentStatus::Accepted,
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            DispatchError::JobClosed {
                job_id: "j".into(),
                terminal: DispatchTerminal::Cancelled,
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            DispatchError::Exhausted {
                job_id: "j".into(),
                rounds: 3,
            }
            .kind(),
            ErrorKind::Exhausted
        );
    }

    #[test]
    fn conflict_display_names_status() {
        let err = DispatchError::Conflict {
            assignment_id: "a-1".into(),
            status: AssignmentStatus::Superseded,
        };
        assert_eq!(err.to_string(), "Assignment a-1 is already superseded");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DispatchError>();
        assert_send_sync::<StoreError>();
    }
}
