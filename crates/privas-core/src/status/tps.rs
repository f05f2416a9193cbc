//! Job status as seen by the TPS.
//!
//! Wire form is one line: `epoch\tSTATE\tdetails`. Tabs, newlines and
//! backslashes inside the details are escaped so the line stays a line.

use super::StatusParseError;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of one compute job on the TPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TpsState {
    Pending,
    Started,
    Running,
    Done,
    Error,
    Unreachable,
    Unknown,
}

impl TpsState {
    pub const ALL: &'static [TpsState] = &[
        TpsState::Pending,
        TpsState::Started,
        TpsState::Running,
        TpsState::Done,
        TpsState::Error,
        TpsState::Unreachable,
        TpsState::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TpsState::Pending => "PENDING",
            TpsState::Started => "STARTED",
            TpsState::Running => "RUNNING",
            TpsState::Done => "DONE",
            TpsState::Error => "ERROR",
            TpsState::Unreachable => "UNREACHABLE",
            TpsState::Unknown => "UNKNOWN",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            TpsState::Pending => 0,
            TpsState::Started => 1,
            TpsState::Running => 2,
            TpsState::Done => 3,
            TpsState::Error => 4,
            TpsState::Unreachable => 5,
            TpsState::Unknown => 6,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            TpsState::Pending => "Job is waiting in the queue",
            TpsState::Started => "Job has started",
            TpsState::Running => "Job is running",
            TpsState::Done => "Job is finished",
            TpsState::Error => "Job has failed",
            TpsState::Unreachable => "TPS cannot be reached",
            TpsState::Unknown => "Job status is unknown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TpsState::Done | TpsState::Error)
    }

    /// Whether a job in `self` may move to `next`.
    ///
    /// RUNNING may repeat. ERROR and UNREACHABLE are reachable from any
    /// non-terminal state.
    pub fn accepts(self, next: TpsState) -> bool {
        use TpsState as S;
        if self.is_terminal() {
            return false;
        }
        match next {
            S::Error | S::Unreachable => true,
            S::Pending => matches!(self, S::Unknown | S::Pending | S::Unreachable),
            S::Started => matches!(self, S::Unknown | S::Pending | S::Unreachable),
            S::Running => matches!(self, S::Started | S::Running | S::Unreachable),
            S::Done => matches!(self, S::Started | S::Running),
            S::Unknown => false,
        }
    }
}

impl fmt::Display for TpsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TpsState {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TpsState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| StatusParseError::State(s.to_string()))
    }
}

/// One observation of a TPS job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpStatus {
    /// Milliseconds since the Unix epoch, TPS clock. Display and ordering only.
    pub epoch: u64,
    pub state: TpsState,
    pub details: String,
}

impl TpStatus {
    pub fn new(state: TpsState, details: impl Into<String>) -> Self {
        Self::at(crate::now_millis(), state, details)
    }

    pub fn at(epoch: u64, state: TpsState, details: impl Into<String>) -> Self {
        Self {
            epoch,
            state,
            details: details.into(),
        }
    }

    /// Parse a status line, falling back rather than failing.
    ///
    /// An unparsable epoch becomes the current time and an unparsable state
    /// becomes UNKNOWN.
    pub fn parse(line: &str) -> Self {
        Self::parse_at(line, crate::now_millis())
    }

    pub fn parse_at(line: &str, now: u64) -> Self {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut parts = line.splitn(3, '\t');
        let epoch = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(now);
        let state = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(TpsState::Unknown);
        let details = parts.next().map(unescape).unwrap_or_default();
        Self {
            epoch,
            state,
            details,
        }
    }
}

impl fmt::Display for TpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.epoch, self.state, escape(&self.details))
    }
}

fn escape(details: &str) -> String {
    let mut out = String::with_capacity(details.len());
    for c in details.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
