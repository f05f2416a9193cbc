//! Third-party server for PrivAS.
//!
//! The TPS holds the only private key able to open a client's submission. It
//! runs one job per session: read the job directory the RPP prepared, decrypt,
//! run the association engine, encrypt the results for the client, and report
//! every step as a [`TpStatus`](privas_core::status::TpStatus).

pub mod engine;
pub mod job;
pub mod keys;
pub mod runner;
pub mod tracker;

pub use engine::{CARRIER_COUNT, CarrierCountEngine, ComputeEngine, EngineError, EngineInput};
pub use job::{JobDir, JobInputs};
pub use keys::{KeyError, TpsKeys};
pub use runner::{Tps, run_job};
pub use tracker::{FileStatusSink, JobTracker, RemoteStatusSink, StatusSink, TrackerError};

use privas_core::CryptoError;
use privas_core::handoff::HandoffError;
use privas_core::payload::PayloadError;
use std::io;

/// Why a job did not reach DONE.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job directory: {0}")]
    Io(#[from] io::Error),
    #[error("cannot open client submission: {0}")]
    Handoff(#[from] HandoffError),
    #[error("reference genotypes are malformed: {0}")]
    Reference(#[from] PayloadError),
    #[error("{0}")]
    Engine(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("job queue is closed")]
    QueueClosed,
}
