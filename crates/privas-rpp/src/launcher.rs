//! Handing prepared jobs to the TPS.

use privas_core::{Encryptor, PublicKey};
use privas_tps::{CarrierCountEngine, FileStatusSink, JobDir, KeyError, Tps, TpsKeys};
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Starts TPS jobs and knows the TPS's public key.
pub trait TpsLauncher: Send + Sync {
    fn public_key(&self) -> &PublicKey;

    /// Start the job in `job` and return without waiting for it.
    ///
    /// From then on the job reports through its `tps.status` artifact.
    fn launch(&self, job: JobDir) -> io::Result<()>;
}

/// Runs the TPS in-process on the same host.
pub struct LocalLauncher {
    tps: Tps,
}

impl LocalLauncher {
    pub fn new(tps: Tps) -> Self {
        Self { tps }
    }

    /// Load the TPS keys from `dir`, generating them on first start.
    pub async fn from_dir(
        dir: &Path,
        enc: Arc<dyn Encryptor>,
        max_jobs: usize,
    ) -> Result<Self, KeyError> {
        let keys = TpsKeys::load_or_generate(enc.as_ref(), dir).await?;
        Ok(Self::new(Tps::new(
            keys,
            enc,
            Arc::new(CarrierCountEngine::default()),
            max_jobs,
        )))
    }
}

impl TpsLauncher for LocalLauncher {
    fn public_key(&self) -> &PublicKey {
        self.tps.public_key()
    }

    fn launch(&self, job: JobDir) -> io::Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;
        let tps = self.tps.clone();
        runtime.spawn(async move {
            let sink = FileStatusSink::new(job.clone());
            if let Err(e) = tps.submit(job.clone(), sink).await {
                tracing::warn!(job = %job.path().display(), error = %e, "TPS job failed");
            }
        });
        Ok(())
    }
}
