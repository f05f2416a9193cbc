//! Job directory layout.
//!
//! The RPP fills a job directory with the client's sealed blobs and its own
//! reference genotypes; the TPS reads them, and writes back a status
//! artifact and the sealed results.

use privas_core::SessionId;
use privas_core::handoff::SealedSubmission;
use std::io;
use std::path::{Path, PathBuf};

const SESSION: &str = "session";
const AES_KEY: &str = "client.aes";
const CLIENT_DATA: &str = "client.data";
const EXCLUDED: &str = "client.excluded";
const ALGORITHM: &str = "algorithm";
const REFERENCE: &str = "reference.tsv";
const STATUS: &str = "tps.status";
const RESULTS: &str = "results";

/// Everything a job needs as input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInputs {
    pub session: SessionId,
    pub sealed: SealedSubmission,
    pub algorithm: String,
    /// Reference genotypes, already hashed with the session salt.
    pub reference: String,
}

/// A job's working directory.
#[derive(Debug, Clone)]
pub struct JobDir {
    root: PathBuf,
}

impl JobDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn status_path(&self) -> PathBuf {
        self.root.join(STATUS)
    }

    pub fn results_path(&self) -> PathBuf {
        self.root.join(RESULTS)
    }

    pub async fn write_inputs(&self, inputs: &JobInputs) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let files = [
            (SESSION, inputs.session.as_str()),
            (AES_KEY, inputs.sealed.encrypted_aes_key.as_str()),
            (CLIENT_DATA, inputs.sealed.encrypted_client_data.as_str()),
            (EXCLUDED, inputs.sealed.encrypted_excluded_variants.as_str()),
            (ALGORITHM, inputs.algorithm.as_str()),
            (REFERENCE, inputs.reference.as_str()),
        ];
        for (name, contents) in files {
            write_atomic(&self.root.join(name), contents).await?;
        }
        Ok(())
    }

    pub async fn read_inputs(&self) -> io::Result<JobInputs> {
        let session = self.read(SESSION).await?;
        let session = session
            .trim()
            .parse::<SessionId>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e}")))?;
        Ok(JobInputs {
            session,
            sealed: SealedSubmission {
                encrypted_aes_key: self.read(AES_KEY).await?,
                encrypted_client_data: self.read(CLIENT_DATA).await?,
                encrypted_excluded_variants: self.read(EXCLUDED).await?,
            },
            algorithm: self.read(ALGORITHM).await?.trim().to_string(),
            reference: self.read(REFERENCE).await?,
        })
    }

    /// Read the session id alone, for status pushing.
    pub async fn session(&self) -> io::Result<SessionId> {
        self.read(SESSION)
            .await?
            .trim()
            .parse::<SessionId>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e}")))
    }

    pub async fn read_status(&self) -> io::Result<String> {
        tokio::fs::read_to_string(self.status_path()).await
    }

    pub async fn write_status(&self, line: &str) -> io::Result<()> {
        write_atomic(&self.status_path(), line).await
    }

    pub async fn read_results(&self) -> io::Result<String> {
        tokio::fs::read_to_string(self.results_path()).await
    }

    pub async fn write_results(&self, sealed: &str) -> io::Result<()> {
        write_atomic(&self.results_path(), sealed).await
    }

    async fn read(&self, name: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.root.join(name)).await
    }
}

/// Write through a temporary file so readers never see half a file.
pub async fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}
