//! Time-boxed, round-based job dispatch.
//!
//! A job is offered to one contractor at a time. Each offer has a deadline;
//! a rejection or a lapsed deadline moves the job to the next candidate, and
//! the first acceptance wins. Every status change goes through a single
//! compare-and-swap in the [`store`], which is what keeps concurrent accepts,
//! rejects and expiry sweeps from ever producing two winners.

pub mod api;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod locator;
pub mod notify;
pub mod store;

pub use api::DispatchApi;
pub use error::{DispatchError, ErrorKind, StoreError};
