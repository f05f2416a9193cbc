//! Reference Panel Provider daemon for PrivAS.
//!
//! The RPP is the only party both the Client and the TPS talk to. It opens
//! sessions, extracts and hashes its own reference genotypes, relays the
//! client's sealed payload to the TPS, folds TPS job status into the session
//! status, and hands back sealed results it cannot read.

pub mod config;
pub mod extract;
pub mod launcher;
pub mod server;
pub mod service;
pub mod store;

pub use config::{Config, ConfigError};
pub use extract::{ExtractError, ExtractRequest, ReferenceExtractor, TsvExtractor};
pub use launcher::{LocalLauncher, TpsLauncher};
pub use service::{Rpp, SessionRequest};
pub use store::{SessionStore, StoreError};
