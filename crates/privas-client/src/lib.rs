//! Client side of PrivAS.
//!
//! [`RppClient`] speaks the message catalog to one RPP, one method per
//! exchange. [`run_analysis`] strings the exchanges together with the key
//! handoff: open a session, seal the genotypes, submit, poll, decrypt.

mod analysis;
mod client;

pub use analysis::{Analysis, ClientInput, run_analysis};
pub use client::{Monitor, RppClient, RppConfiguration, SessionGrant, SessionParams};

use privas_core::payload::PayloadError;
use privas_core::status::RppState;
use privas_core::{CryptoError, MessageError, MessageKind, SessionId, WireError};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot reach RPP at {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("RPP refused: {0}")]
    Refused(String),
    #[error("expected {expected}, RPP sent {got}")]
    Unexpected {
        expected: MessageKind,
        got: MessageKind,
    },
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("session {session} ended in {state}: {details}")]
    Failed {
        session: SessionId,
        state: RppState,
        details: String,
    },
    #[error("reading input: {0}")]
    Io(#[from] io::Error),
    #[error("malformed input: {0}")]
    Input(#[from] PayloadError),
}
