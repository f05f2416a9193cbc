//! Job lifecycle tracking and status publishing.

use crate::job::JobDir;
use privas_core::status::{TpStatus, TpsState};
use privas_core::wire::{self, Framing};
use privas_core::{Message, SendTpsStatus, SessionId};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Where job status observations go.
pub trait StatusSink: Send + Sync {
    fn publish(&self, status: &TpStatus) -> impl Future<Output = io::Result<()>> + Send;
}

/// Overwrites the job's status artifact for the RPP to poll.
#[derive(Debug, Clone)]
pub struct FileStatusSink {
    job: JobDir,
}

impl FileStatusSink {
    pub fn new(job: JobDir) -> Self {
        Self { job }
    }
}

impl StatusSink for FileStatusSink {
    async fn publish(&self, status: &TpStatus) -> io::Result<()> {
        self.job.write_status(&status.to_string()).await
    }
}

/// Pushes `SendTPSStatus` messages to the RPP.
///
/// Publishing never fails: a push the RPP does not take is logged, and the
/// RPP picks the change up from the job's status file on its next poll.
#[derive(Debug, Clone)]
pub struct RemoteStatusSink {
    rpp: SocketAddr,
    session: SessionId,
    framing: Framing,
}

impl RemoteStatusSink {
    pub fn new(rpp: SocketAddr, session: SessionId, framing: Framing) -> Self {
        Self {
            rpp,
            session,
            framing,
        }
    }

    /// Push one status and wait for the RPP's reply.
    pub async fn push(&self, status: &TpStatus) -> io::Result<()> {
        let mut stream = TcpStream::connect(self.rpp).await?;
        let push: Message = SendTpsStatus::new(&self.session, status).into();
        self.framing
            .write(&mut stream, &push)
            .await
            .map_err(io::Error::other)?;
        match wire::read(&mut stream).await.map_err(io::Error::other)? {
            Message::SendError(e) => Err(io::Error::other(e.error_message)),
            _ => Ok(()),
        }
    }
}

impl StatusSink for RemoteStatusSink {
    async fn publish(&self, status: &TpStatus) -> io::Result<()> {
        if let Err(e) = self.push(status).await {
            tracing::warn!(
                rpp = %self.rpp,
                session = %self.session,
                state = %status.state,
                error = %e,
                "status push failed"
            );
        }
        Ok(())
    }
}

impl<A: StatusSink, B: StatusSink> StatusSink for (A, B) {
    async fn publish(&self, status: &TpStatus) -> io::Result<()> {
        self.0.publish(status).await?;
        self.1.publish(status).await
    }
}

/// Error moving a job between states.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("job cannot move from {from} to {to}")]
    IllegalTransition { from: TpsState, to: TpsState },
    #[error("failed to publish job status: {0}")]
    Publish(#[from] io::Error),
}

/// Holds a job's current state and publishes every change.
pub struct JobTracker<S> {
    state: TpsState,
    sink: S,
}

impl<S: StatusSink> JobTracker<S> {
    pub fn new(sink: S) -> Self {
        Self {
            state: TpsState::Unknown,
            sink,
        }
    }

    pub fn state(&self) -> TpsState {
        self.state
    }

    pub async fn advance(
        &mut self,
        next: TpsState,
        details: impl Into<String>,
    ) -> Result<TpStatus, TrackerError> {
        if !self.state.accepts(next) {
            return Err(TrackerError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        let status = TpStatus::new(next, details);
        self.sink.publish(&status).await?;
        tracing::debug!(from = %self.state, to = %next, details = %status.details, "job status");
        self.state = next;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<TpStatus>>);

    impl StatusSink for &Recorder {
        async fn publish(&self, status: &TpStatus) -> io::Result<()> {
            self.0.lock().unwrap().push(status.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn walks_the_happy_path() {
        let recorder = Recorder::default();
        let mut tracker = JobTracker::new(&recorder);
        tracker.advance(TpsState::Pending, "0").await.unwrap();
        tracker.advance(TpsState::Started, "").await.unwrap();
        tracker.advance(TpsState::Running, "1/2 genes").await.unwrap();
        tracker.advance(TpsState::Running, "2/2 genes").await.unwrap();
        tracker.advance(TpsState::Done, "").await.unwrap();

        let states: Vec<TpsState> = recorder.0.lock().unwrap().iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            [
                TpsState::Pending,
                TpsState::Started,
                TpsState::Running,
                TpsState::Running,
                TpsState::Done
            ]
        );
    }

    #[tokio::test]
    async fn refuses_to_leave_a_terminal_state() {
        let recorder = Recorder::default();
        let mut tracker = JobTracker::new(&recorder);
        tracker.advance(TpsState::Error, "bad input").await.unwrap();
        let err = tracker.advance(TpsState::Running, "").await.unwrap_err();
        assert!(matches!(err, TrackerError::IllegalTransition { .. }));
        assert_eq!(tracker.state(), TpsState::Error);
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_sink_writes_parsable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDir::new(dir.path());
        let mut tracker = JobTracker::new(FileStatusSink::new(job.clone()));
        tracker.advance(TpsState::Started, "").await.unwrap();
        tracker
            .advance(TpsState::Running, "genes\t3/9\nETA 1m")
            .await
            .unwrap();
        let status = TpStatus::parse(&job.read_status().await.unwrap());
        assert_eq!(status.state, TpsState::Running);
        assert_eq!(status.details, "genes\t3/9\nETA 1m");
    }

    #[tokio::test]
    async fn unreachable_rpp_does_not_stop_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDir::new(dir.path());
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let closed = listener.local_addr().unwrap();
        drop(listener);

        let remote = RemoteStatusSink::new(closed, SessionId::generate(), Framing::default());
        assert!(remote.push(&TpStatus::new(TpsState::Pending, "0")).await.is_err());

        let mut tracker = JobTracker::new((FileStatusSink::new(job.clone()), remote));
        tracker.advance(TpsState::Pending, "0").await.unwrap();
        tracker.advance(TpsState::Started, "").await.unwrap();
        assert_eq!(tracker.state(), TpsState::Started);
        let status = TpStatus::parse(&job.read_status().await.unwrap());
        assert_eq!(status.state, TpsState::Started);
    }
}
