//! Durable per-session status.
//!
//! Each session is a directory under the store root. Its `status` file is the
//! only source of truth for where the session stands: a transition reads it,
//! applies [`RppStatus::next`] and writes it back under the session's lock,
//! so a restarted RPP resumes from the last status written.

use privas_core::SessionId;
use privas_core::status::{RppEvent, RppState, RppStatus};
use privas_tps::JobDir;
use privas_tps::job::write_atomic;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const STATUS: &str = "status";
pub const REQUEST: &str = "request.json";
pub const SALT: &str = "salt";
pub const CLIENT_AES_KEY: &str = "client.aes";
pub const CLIENT_DATA: &str = "client.data";
pub const CLIENT_EXCLUDED: &str = "client.excluded";
pub const CLIENT_ALGORITHM: &str = "client.algorithm";
pub const REFERENCE: &str = "reference.tsv";
pub const JOB: &str = "job";
pub const RESULTS: &str = "results";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no such session: {0}")]
    NoSession(SessionId),
    #[error("session store: {0}")]
    Io(#[from] io::Error),
}

type SessionLock = Arc<tokio::sync::Mutex<()>>;

/// A held session lock.
///
/// Dropping it forgets the session's entry in the lock map once nobody else
/// holds or waits on it, so the map only tracks sessions in use.
struct SessionGuard<'a> {
    store: &'a SessionStore,
    id: SessionId,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.store.locks.lock().unwrap_or_else(|e| e.into_inner());
        self.guard.take();
        // every other holder cloned the lock through the map, under this mutex
        if locks.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.id);
        }
    }
}

pub struct SessionStore {
    root: PathBuf,
    ttl: Duration,
    locks: Mutex<HashMap<SessionId, SessionLock>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn job_dir(&self, id: &SessionId) -> JobDir {
        JobDir::new(self.session_dir(id).join(JOB))
    }

    async fn lock(&self, id: &SessionId) -> SessionGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id.clone()).or_default().clone()
        };
        SessionGuard {
            store: self,
            id: id.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Allocate a fresh session and persist NEW_SESSION.
    pub async fn create(&self) -> Result<(SessionId, RppStatus), StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        loop {
            let id = SessionId::generate();
            match tokio::fs::create_dir(self.session_dir(&id)).await {
                Ok(()) => {
                    let now = privas_core::now_millis();
                    let status = RppStatus::next(None, &RppEvent::Created, now);
                    write_atomic(&self.session_dir(&id).join(STATUS), &status.to_string()).await?;
                    tracing::info!(session = %id, "session created");
                    return Ok((id, status));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn exists(&self, id: &SessionId) -> bool {
        self.session_dir(id).is_dir()
    }

    /// Last persisted status, read without taking the lock.
    ///
    /// A missing session reads as NO_SESSION and an unreadable status file as
    /// UNKNOWN.
    pub async fn status(&self, id: &SessionId) -> RppStatus {
        let now = privas_core::now_millis();
        if !self.exists(id) {
            return RppStatus::no_session(now);
        }
        match self.read_status(id).await {
            Ok(Some(status)) => status,
            Ok(None) | Err(_) => RppStatus::unknown(now),
        }
    }

    async fn read_status(&self, id: &SessionId) -> io::Result<Option<RppStatus>> {
        let text = tokio::fs::read_to_string(self.session_dir(id).join(STATUS)).await?;
        Ok(text.parse().ok())
    }

    /// Apply `event` to the persisted status and return `(previous, next)`.
    pub async fn transition(
        &self,
        id: &SessionId,
        event: RppEvent,
    ) -> Result<(RppStatus, RppStatus), StoreError> {
        if !self.exists(id) {
            return Err(StoreError::NoSession(id.clone()));
        }
        let _guard = self.lock(id).await;
        if !self.exists(id) {
            return Err(StoreError::NoSession(id.clone()));
        }
        let now = privas_core::now_millis();
        let previous = match self.read_status(id).await {
            Ok(status) => status,
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let next = RppStatus::next(previous.as_ref(), &event, now);
        let previous = previous.unwrap_or_else(|| RppStatus::unknown(now));
        if next != previous {
            write_atomic(&self.session_dir(id).join(STATUS), &next.to_string()).await?;
            tracing::info!(
                session = %id,
                from = %previous.state,
                to = %next.state,
                "session status"
            );
        }
        Ok((previous, next))
    }

    pub async fn write_file(
        &self,
        id: &SessionId,
        name: &str,
        contents: &str,
    ) -> Result<(), StoreError> {
        if !self.exists(id) {
            return Err(StoreError::NoSession(id.clone()));
        }
        write_atomic(&self.session_dir(id).join(name), contents).await?;
        Ok(())
    }

    /// Write a file that must not exist yet.
    ///
    /// Returns `false` without writing when it already does.
    pub async fn write_file_once(
        &self,
        id: &SessionId,
        name: &str,
        contents: &str,
    ) -> Result<bool, StoreError> {
        use tokio::io::AsyncWriteExt;

        if !self.exists(id) {
            return Err(StoreError::NoSession(id.clone()));
        }
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.session_dir(id).join(name))
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }

    pub async fn read_file(&self, id: &SessionId, name: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.session_dir(id).join(name)).await
    }

    /// Expire every session whose last update is older than the TTL.
    ///
    /// Expired sessions keep only their `status` file. Sessions already
    /// EXPIRED are left alone, so running the sweep twice changes nothing.
    pub async fn sweep(&self, now: u64) -> Result<Vec<SessionId>, StoreError> {
        let mut expired = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(expired),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<SessionId>().ok())
            else {
                continue;
            };
            if self.expire_if_stale(&id, now).await? {
                expired.push(id);
            }
        }
        Ok(expired)
    }

    async fn expire_if_stale(&self, id: &SessionId, now: u64) -> Result<bool, StoreError> {
        let _guard = self.lock(id).await;
        let dir = self.session_dir(id);
        let last_update = match self.read_status(id).await {
            Ok(Some(status)) if status.state == RppState::Expired => return Ok(false),
            Ok(Some(status)) => status.timestamp,
            Ok(None) | Err(_) => modified_millis(&dir).await?,
        };
        if now.saturating_sub(last_update) <= self.ttl.as_millis() as u64 {
            return Ok(false);
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() == STATUS {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        let previous = self.read_status(id).await.ok().flatten();
        let status = RppStatus::next(previous.as_ref(), &RppEvent::Expired, now);
        write_atomic(&dir.join(STATUS), &status.to_string()).await?;
        tracing::info!(session = %id, "session expired");
        Ok(true)
    }
}

async fn modified_millis(path: &Path) -> io::Result<u64> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default())
}
