//! Session status as seen by the RPP.
//!
//! An [`RppStatus`] is never mutated. Every event produces a new status from
//! the previous one through [`RppStatus::next`], and the result is what gets
//! persisted.

use super::StatusParseError;
use super::tps::{TpStatus, TpsState};
use std::fmt;
use std::str::FromStr;

/// Where a session stands on the RPP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RppState {
    Unknown,
    NoSession,
    NewSession,
    WaitingBoth,
    WaitingClient,
    WaitingRpp,
    RppEmptyData,
    TpsSending,
    TpsPending,
    TpsRunning,
    TpsDone,
    TpsError,
    TpsUnknown,
    TpsUnreachable,
    ResultsAvailable,
    Error,
    Expired,
}

impl RppState {
    pub const ALL: &'static [RppState] = &[
        RppState::Unknown,
        RppState::NoSession,
        RppState::NewSession,
        RppState::WaitingBoth,
        RppState::WaitingClient,
        RppState::WaitingRpp,
        RppState::RppEmptyData,
        RppState::TpsSending,
        RppState::TpsPending,
        RppState::TpsRunning,
        RppState::TpsDone,
        RppState::TpsError,
        RppState::TpsUnknown,
        RppState::TpsUnreachable,
        RppState::ResultsAvailable,
        RppState::Error,
        RppState::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RppState::Unknown => "UNKNOWN",
            RppState::NoSession => "NO_SESSION",
            RppState::NewSession => "NEW_SESSION",
            RppState::WaitingBoth => "WAITING_BOTH",
            RppState::WaitingClient => "WAITING_CLIENT",
            RppState::WaitingRpp => "WAITING_RPP",
            RppState::RppEmptyData => "RPP_EMPTY_DATA",
            RppState::TpsSending => "TPS_SENDING",
            RppState::TpsPending => "TPS_PENDING",
            RppState::TpsRunning => "TPS_RUNNING",
            RppState::TpsDone => "TPS_DONE",
            RppState::TpsError => "TPS_ERROR",
            RppState::TpsUnknown => "TPS_UNKNOWN",
            RppState::TpsUnreachable => "TPS_UNREACHABLE",
            RppState::ResultsAvailable => "RESULTS_AVAILABLE",
            RppState::Error => "ERROR",
            RppState::Expired => "EXPIRED",
        }
    }

    /// States a session never leaves except through expiry.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RppState::RppEmptyData
                | RppState::ResultsAvailable
                | RppState::Error
                | RppState::TpsError
                | RppState::Expired
        )
    }

    /// The session has been handed to the TPS and its status comes from there.
    pub fn is_tps_phase(self) -> bool {
        matches!(
            self,
            RppState::TpsSending
                | RppState::TpsPending
                | RppState::TpsRunning
                | RppState::TpsDone
                | RppState::TpsUnknown
                | RppState::TpsUnreachable
        )
    }

    /// The session exists but failed; the only states worth abandoning on.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RppState::Error | RppState::TpsError | RppState::RppEmptyData
        )
    }
}

impl fmt::Display for RppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RppState {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RppState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| StatusParseError::State(s.to_string()))
    }
}

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RppEvent {
    Created,
    ExtractionProgress { eta: String },
    ClientDataReceived,
    ExtractionComplete,
    ExtractionEmpty,
    TpsQueued { ahead: usize },
    TpsRunning { details: String },
    TpsDone { details: String },
    ResultsStaged,
    Expired,
    Fault { details: String },
    TpsFault { details: String },
    TpsUnreachable { details: String },
    TpsUnparsable { details: String },
}

impl RppEvent {
    /// Summarise a TPS job status as an RPP event.
    pub fn from_tps(status: &TpStatus) -> Self {
        let details = status.details.clone();
        match status.state {
            TpsState::Pending => RppEvent::TpsQueued {
                ahead: details.trim().parse().unwrap_or(0),
            },
            TpsState::Started | TpsState::Running => RppEvent::TpsRunning { details },
            TpsState::Done => RppEvent::TpsDone { details },
            TpsState::Error => RppEvent::TpsFault { details },
            TpsState::Unreachable => RppEvent::TpsUnreachable { details },
            TpsState::Unknown => RppEvent::TpsUnparsable { details },
        }
    }
}

/// One point on a session's RPP timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RppStatus {
    /// Milliseconds since the Unix epoch, RPP clock.
    pub timestamp: u64,
    pub state: RppState,
    pub details: Option<String>,
}

impl RppStatus {
    pub fn new(state: RppState, details: Option<String>, timestamp: u64) -> Self {
        Self {
            timestamp,
            state,
            details: details.filter(|d| !d.is_empty()),
        }
    }

    pub fn unknown(timestamp: u64) -> Self {
        Self::new(RppState::Unknown, None, timestamp)
    }

    pub fn no_session(timestamp: u64) -> Self {
        Self::new(RppState::NoSession, None, timestamp)
    }

    /// Compute the status that follows `previous` when `event` happens.
    ///
    /// `now` only stamps the result; the target state depends on the
    /// previous state and the event alone.
    pub fn next(previous: Option<&RppStatus>, event: &RppEvent, now: u64) -> RppStatus {
        use RppState as S;

        let prev_state = previous.map_or(S::Unknown, |p| p.state);
        let prev_details = previous.and_then(|p| p.details.clone());
        let unchanged = || previous.cloned().unwrap_or_else(|| RppStatus::unknown(now));
        let to = |state: RppState, details: Option<String>| RppStatus::new(state, details, now);

        if prev_state == S::Expired {
            return unchanged();
        }
        if prev_state.is_terminal() && !matches!(event, RppEvent::Expired | RppEvent::Created) {
            return unchanged();
        }

        match event {
            RppEvent::Created => to(S::NewSession, None),
            RppEvent::ExtractionProgress { eta } => match prev_state {
                S::NewSession | S::WaitingBoth => to(S::WaitingBoth, Some(eta.clone())),
                S::WaitingRpp => to(S::WaitingRpp, Some(eta.clone())),
                _ => unchanged(),
            },
            RppEvent::ClientDataReceived => match prev_state {
                S::NewSession | S::WaitingBoth => to(S::WaitingRpp, prev_details),
                _ => to(S::TpsSending, None),
            },
            RppEvent::ExtractionComplete => match prev_state {
                S::NewSession | S::WaitingBoth => to(S::WaitingClient, None),
                _ => to(S::TpsSending, None),
            },
            RppEvent::ExtractionEmpty => to(S::RppEmptyData, None),
            RppEvent::TpsQueued { ahead } => to(S::TpsPending, Some(ahead.to_string())),
            RppEvent::TpsRunning { details } => to(S::TpsRunning, Some(details.clone())),
            RppEvent::TpsDone { details } => to(S::TpsDone, Some(details.clone())),
            RppEvent::ResultsStaged => to(S::ResultsAvailable, None),
            RppEvent::Expired => to(S::Expired, None),
            RppEvent::Fault { details } => to(S::Error, Some(details.clone())),
            RppEvent::TpsFault { details } => to(S::TpsError, Some(details.clone())),
            RppEvent::TpsUnreachable { details } => to(S::TpsUnreachable, Some(details.clone())),
            RppEvent::TpsUnparsable { details } => to(S::TpsUnknown, Some(details.clone())),
        }
    }
}

impl fmt::Display for RppStatus {
    /// Timestamp line, state line, then the details line if there is one.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.timestamp, self.state)?;
        if let Some(details) = &self.details {
            write!(f, "\n{details}")?;
        }
        Ok(())
    }
}

impl FromStr for RppStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.splitn(3, '\n');
        let timestamp = lines
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or(StatusParseError::Empty)?;
        let timestamp = timestamp
            .parse()
            .map_err(|_| StatusParseError::Timestamp(timestamp.to_string()))?;
        let state = lines
            .next()
            .ok_or(StatusParseError::Truncated)?
            .trim()
            .parse()?;
        let details = lines.next().map(|d| d.trim_end_matches('\n').to_string());
        Ok(RppStatus::new(state, details, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(state: RppState, details: Option<&str>) -> RppStatus {
        RppStatus::new(state, details.map(String::from), 1_000)
    }

    fn apply(prev: &RppStatus, event: RppEvent) -> RppStatus {
        RppStatus::next(Some(prev), &event, 2_000)
    }

    #[test]
    fn create_starts_new_session() {
        let status = RppStatus::next(None, &RppEvent::Created, 5);
        assert_eq!(status.state, RppState::NewSession);
        assert_eq!(status.timestamp, 5);
    }

    #[test]
    fn client_data_on_new_session_waits_for_rpp() {
        let next = apply(&at(RppState::NewSession, None), RppEvent::ClientDataReceived);
        assert_eq!(next.state, RppState::WaitingRpp);
    }

    #[test]
    fn client_data_on_waiting_both_keeps_eta() {
        let next = apply(
            &at(RppState::WaitingBoth, Some("ETA 3m")),
            RppEvent::ClientDataReceived,
        );
        assert_eq!(next.state, RppState::WaitingRpp);
        assert_eq!(next.details.as_deref(), Some("ETA 3m"));
    }

    #[test]
    fn client_data_on_empty_reference_is_sticky() {
        let prev = at(RppState::RppEmptyData, None);
        assert_eq!(apply(&prev, RppEvent::ClientDataReceived), prev);
    }

    #[test]
    fn client_data_elsewhere_sends_to_tps() {
        for state in [
            RppState::Unknown,
            RppState::WaitingClient,
            RppState::WaitingRpp,
            RppState::TpsSending,
            RppState::TpsPending,
            RppState::TpsRunning,
            RppState::TpsUnreachable,
        ] {
            let next = apply(&at(state, None), RppEvent::ClientDataReceived);
            assert_eq!(next.state, RppState::TpsSending, "from {state}");
        }
    }

    #[test]
    fn client_data_never_reopens_a_finished_session() {
        for state in [
            RppState::ResultsAvailable,
            RppState::Error,
            RppState::TpsError,
            RppState::RppEmptyData,
            RppState::Expired,
        ] {
            let prev = at(state, Some("final"));
            assert_eq!(apply(&prev, RppEvent::ClientDataReceived), prev, "from {state}");
        }
        // every other state moves towards the TPS
        for state in RppState::ALL.iter().copied().filter(|s| !s.is_terminal()) {
            let next = apply(&at(state, None), RppEvent::ClientDataReceived).state;
            assert!(
                matches!(next, RppState::TpsSending | RppState::WaitingRpp),
                "from {state}: {next}"
            );
        }
    }

    #[test]
    fn extraction_progress_narrows_once_client_data_is_in() {
        let eta = |s: &str| RppEvent::ExtractionProgress { eta: s.into() };
        let s = apply(&at(RppState::NewSession, None), eta("5m"));
        assert_eq!(s.state, RppState::WaitingBoth);
        let s = apply(&s, eta("4m"));
        assert_eq!((s.state, s.details.as_deref()), (RppState::WaitingBoth, Some("4m")));
        let s = apply(&s, RppEvent::ClientDataReceived);
        let s = apply(&s, eta("1m"));
        assert_eq!((s.state, s.details.as_deref()), (RppState::WaitingRpp, Some("1m")));
    }

    #[test]
    fn both_completion_orders_converge() {
        let new = at(RppState::NewSession, None);
        let a = apply(&apply(&new, RppEvent::ClientDataReceived), RppEvent::ExtractionComplete);
        let b = apply(&apply(&new, RppEvent::ExtractionComplete), RppEvent::ClientDataReceived);
        assert_eq!(a.state, RppState::TpsSending);
        assert_eq!(b.state, RppState::TpsSending);
        assert_eq!(
            apply(&new, RppEvent::ExtractionComplete).state,
            RppState::WaitingClient
        );
    }

    #[test]
    fn tps_events_map_to_tps_states() {
        let sending = at(RppState::TpsSending, None);
        let queued = apply(&sending, RppEvent::TpsQueued { ahead: 3 });
        assert_eq!((queued.state, queued.details.as_deref()), (RppState::TpsPending, Some("3")));
        let running = apply(&queued, RppEvent::TpsRunning { details: "10/50 genes".into() });
        assert_eq!(running.state, RppState::TpsRunning);
        let done = apply(&running, RppEvent::TpsDone { details: "retrieving".into() });
        assert_eq!(done.state, RppState::TpsDone);
        assert_eq!(apply(&done, RppEvent::ResultsStaged).state, RppState::ResultsAvailable);
    }

    #[test]
    fn terminal_states_only_expire() {
        let done = at(RppState::ResultsAvailable, None);
        assert_eq!(apply(&done, RppEvent::TpsRunning { details: "late".into() }), done);
        assert_eq!(apply(&done, RppEvent::Expired).state, RppState::Expired);

        let failed = at(RppState::Error, Some("decrypt failed"));
        assert_eq!(apply(&failed, RppEvent::ResultsStaged), failed);
    }

    #[test]
    fn expiry_is_idempotent() {
        let expired = at(RppState::Expired, None);
        assert_eq!(apply(&expired, RppEvent::Expired), expired);
        assert_eq!(apply(&expired, RppEvent::ExtractionComplete), expired);
    }

    #[test]
    fn faults_are_distinguished_by_origin() {
        let running = at(RppState::TpsRunning, None);
        assert_eq!(
            apply(&running, RppEvent::Fault { details: "disk".into() }).state,
            RppState::Error
        );
        assert_eq!(
            apply(&running, RppEvent::TpsFault { details: "oom".into() }).state,
            RppState::TpsError
        );
        assert_eq!(
            apply(&running, RppEvent::TpsUnreachable { details: "no file".into() }).state,
            RppState::TpsUnreachable
        );
    }

    #[test]
    fn tps_status_summary() {
        let status = |state, details: &str| TpStatus::at(1, state, details);
        assert_eq!(
            RppEvent::from_tps(&status(TpsState::Pending, "2")),
            RppEvent::TpsQueued { ahead: 2 }
        );
        assert_eq!(
            RppEvent::from_tps(&status(TpsState::Started, "")),
            RppEvent::TpsRunning { details: String::new() }
        );
        assert!(matches!(
            RppEvent::from_tps(&status(TpsState::Unknown, "?")),
            RppEvent::TpsUnparsable { .. }
        ));
    }

    #[test]
    fn text_form_roundtrip() {
        let with = at(RppState::TpsRunning, Some("processed 12/50\nETA 3m"));
        assert_eq!(with.to_string(), "1000\nTPS_RUNNING\nprocessed 12/50\nETA 3m");
        assert_eq!(with.to_string().parse::<RppStatus>().unwrap(), with);

        let without = at(RppState::NewSession, None);
        assert_eq!(without.to_string(), "1000\nNEW_SESSION");
        assert_eq!(without.to_string().parse::<RppStatus>().unwrap(), without);
    }

    #[test]
    fn bad_text_is_rejected() {
        assert_eq!("".parse::<RppStatus>(), Err(StatusParseError::Empty));
        assert_eq!("12".parse::<RppStatus>(), Err(StatusParseError::Truncated));
        assert!(matches!(
            "x\nNEW_SESSION".parse::<RppStatus>(),
            Err(StatusParseError::Timestamp(_))
        ));
        assert!(matches!(
            "12\nSLEEPING".parse::<RppStatus>(),
            Err(StatusParseError::State(_))
        ));
    }
}
