mod assignment;
mod coordinator;
mod gate;
mod state;
mod watcher;

pub use assignment::{
    AcceptanceWindow, AssignmentStatus, DispatchRequest, GeoPoint, JobAssignment,
    MAX_WINDOW_SECS, Urgency,
};
pub use coordinator::{DispatchCoordinator, DispatchOutcome, DispatchPolicy};
pub use gate::{AcceptanceGate, Rejection};
pub use state::{DispatchPhase, DispatchTerminal, JobDispatchState};
pub use watcher::{ExpiryWatcher, SweepReport};
