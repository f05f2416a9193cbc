//! Session and job status values.
//!
//! Two timelines coexist per session: the RPP's [`RppStatus`] and the TPS's
//! [`TpStatus`]. The RPP derives its TPS_* states from the latter; it never
//! mirrors it.

mod rpp;
mod tps;

pub use rpp::{RppEvent, RppState, RppStatus};
pub use tps::{TpStatus, TpsState};

/// Error parsing a persisted RPP status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusParseError {
    #[error("status is empty")]
    Empty,
    #[error("status has no state line")]
    Truncated,
    #[error("invalid status timestamp: {0}")]
    Timestamp(String),
    #[error("unknown status state: {0}")]
    State(String),
}
