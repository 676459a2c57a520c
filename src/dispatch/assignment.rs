use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

/// Upper bound for any acceptance window: one day.
pub const MAX_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Lifecycle status of a single offer.
///
/// `Pending` is the only non-terminal status. Every other status is final for
/// the assignment it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Superseded,
}

impl AssignmentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AssignmentStatus::Pending)
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentStatus::Pending => write!(f, "pending"),
            AssignmentStatus::Accepted => write!(f, "accepted"),
            AssignmentStatus::Rejected => write!(f, "rejected"),
            AssignmentStatus::Expired => write!(f, "expired"),
            AssignmentStatus::Superseded => write!(f, "superseded"),
        }
    }
}

/// How quickly the job owner needs someone on site. Drives the acceptance window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Normal,
    Urgent,
    Emergency,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::Normal => write!(f, "normal"),
            Urgency::Urgent => write!(f, "urgent"),
            Urgency::Emergency => write!(f, "emergency"),
        }
    }
}

/// Acceptance window per urgency level, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceWindow {
    #[serde(default = "default_normal_secs")]
    pub normal_secs: u64,
    #[serde(default = "default_urgent_secs")]
    pub urgent_secs: u64,
    #[serde(default = "default_emergency_secs")]
    pub emergency_secs: u64,
}

fn default_normal_secs() -> u64 {
    180
}

fn default_urgent_secs() -> u64 {
    120
}

fn default_emergency_secs() -> u64 {
    60
}

impl Default for AcceptanceWindow {
    fn default() -> Self {
        Self {
            normal_secs: default_normal_secs(),
            urgent_secs: default_urgent_secs(),
            emergency_secs: default_emergency_secs(),
        }
    }
}

impl AcceptanceWindow {
    /// Same window regardless of urgency.
    pub fn uniform(secs: u64) -> Self {
        Self {
            normal_secs: secs,
            urgent_secs: secs,
            emergency_secs: secs,
        }
    }

    pub fn shortest_secs(&self) -> u64 {
        self.normal_secs.min(self.urgent_secs).min(self.emergency_secs)
    }

    pub fn longest_secs(&self) -> u64 {
        self.normal_secs.max(self.urgent_secs).max(self.emergency_secs)
    }

    pub fn for_urgency(&self, urgency: Urgency) -> Duration {
        let secs = match urgency {
            Urgency::Normal => self.normal_secs,
            Urgency::Urgent => self.urgent_secs,
            Urgency::Emergency => self.emergency_secs,
        };
        Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX)).unwrap_or(Duration::MAX)
    }
}

/// Geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Everything the dispatch core needs to know about a job to find candidates
/// and to word the offer. Captured once, when dispatch for the job begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub job_id: String,
    pub location: GeoPoint,
    pub job_type: String,
    pub estimated_value: f64,
    #[serde(default)]
    pub urgency: Urgency,
}

/// One offer of one job to one contractor. Never deleted, only transitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAssignment {
    pub id: String,
    pub job_id: String,
    pub contractor_id: String,
    pub status: AssignmentStatus,
    pub dispatch_round: u32,
    pub distance_to_job: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
    /// Ticket id handed back by the push service, when one was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_receipt: Option<String>,
}

impl JobAssignment {
    /// Build a fresh `pending` offer that expires `window` after `now`.
    pub fn offer(
        job_id: &str,
        contractor_id: &str,
        dispatch_round: u32,
        distance_to_job: f64,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Self, DispatchError> {
        let expires_at = now
            .checked_add_signed(window)
            .ok_or_else(|| DispatchError::WindowOutOfRange {
                job_id: job_id.to_string(),
                window_secs: window.num_seconds(),
            })?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            contractor_id: contractor_id.to_string(),
            status: AssignmentStatus::Pending,
            dispatch_round,
            distance_to_job,
            created_at: now,
            expires_at,
            responded_at: None,
            push_receipt: None,
        })
    }

    /// Expiry is derived from time alone; it does not wait for a sweep.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Still pending and inside its window.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AssignmentStatus::Pending && !self.is_expired_at(now)
    }

    /// Whole seconds left to respond, floored at zero.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_starts_pending_with_window() {
        let now = Utc::now();
        let a = JobAssignment::offer("job-1", "c-1", 1, 2.5, now, Duration::seconds(300)).unwrap();
        assert_eq!(a.status, AssignmentStatus::Pending);
        assert_eq!(a.dispatch_round, 1);
        assert_eq!(a.expires_at, now + Duration::seconds(300));
        assert!(a.responded_at.is_none());
        assert!(a.is_live_at(now));
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let now = Utc::now();
        let a = JobAssignment::offer("job-1", "c-1", 1, 0.0, now, Duration::seconds(60)).unwrap();
        assert!(!a.is_expired_at(now + Duration::seconds(59)));
        assert!(a.is_expired_at(now + Duration::seconds(60)));
        assert!(!a.is_live_at(now + Duration::seconds(61)));
        assert_eq!(a.seconds_remaining(now + Duration::seconds(90)), 0);
        assert_eq!(a.seconds_remaining(now + Duration::seconds(15)), 45);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!AssignmentStatus::Pending.is_terminal());
        for status in [
            AssignmentStatus::Accepted,
            AssignmentStatus::Rejected,
            AssignmentStatus::Expired,
            AssignmentStatus::Superseded,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn window_follows_urgency() {
        let window = AcceptanceWindow::default();
        assert_eq!(window.for_urgency(Urgency::Normal), Duration::minutes(3));
        assert_eq!(window.for_urgency(Urgency::Urgent), Duration::minutes(2));
        assert_eq!(window.for_urgency(Urgency::Emergency), Duration::minutes(1));
        assert_eq!(
            AcceptanceWindow::uniform(300).for_urgency(Urgency::Emergency),
            Duration::seconds(300)
        );
    }

    #[test]
    fn oversized_window_is_an_error_not_a_panic() {
        let window = AcceptanceWindow::uniform(u64::MAX).for_urgency(Urgency::Normal);
        let err = JobAssignment::offer("job-1", "c-1", 1, 0.0, Utc::now(), window).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::WindowOutOfRange { ref job_id, .. } if job_id == "job-1"
        ));

        let window = AcceptanceWindow::uniform(100_000_000_000_000).for_urgency(Urgency::Normal);
        assert!(JobAssignment::offer("job-1", "c-1", 1, 0.0, Utc::now(), window).is_err());
    }

    #[test]
    fn window_bounds() {
        let window = AcceptanceWindow {
            normal_secs: 180,
            urgent_secs: 120,
            emergency_secs: 60,
        };
        assert_eq!(window.shortest_secs(), 60);
        assert_eq!(window.longest_secs(), 180);
    }

    #[test]
    fn persisted_field_names_are_camel_case() {
        let a = JobAssignment::offer("job-1", "c-1", 2, 1.0, Utc::now(), Duration::seconds(60))
            .unwrap();
        let json = serde_json::to_value(&a).unwrap();
        for key in [
            "id",
            "jobId",
            "contractorId",
            "status",
            "dispatchRound",
            "distanceToJob",
            "createdAt",
            "expiresAt",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["status"], "pending");
        assert!(json.get("respondedAt").is_none());
    }
}
