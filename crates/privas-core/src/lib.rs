//! Core types for PrivAS.
//!
//! This crate holds everything the Client, the RPP and the TPS must agree on:
//! the message catalog, the chunked wire framing, both status timelines and
//! the key handoff. It does no networking and touches no files.

mod crypto;
pub mod handoff;
mod message;
pub mod payload;
mod session;
pub mod status;
pub mod wire;

pub use crypto::{
    AesKey, CryptoError, DEFAULT_RSA_BITS, Encryptor, OpensslEncryptor, PrivateKey, PublicKey,
    Salt, decode_field, encode_field,
};
pub use message::*;
pub use session::{SessionId, SessionIdError};
pub use wire::{DEFAULT_BLOCK_SIZE, Framing, WireError};

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A reference panel the RPP serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Name the Client passes back in `AskSession`.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

impl Dataset {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
