//! Job execution and queueing.

use crate::JobError;
use crate::engine::{ComputeEngine, EngineInput};
use crate::job::JobDir;
use crate::keys::TpsKeys;
use crate::tracker::{JobTracker, StatusSink};
use privas_core::handoff::{open_submission, seal_results};
use privas_core::payload;
use privas_core::status::TpsState;
use privas_core::{Encryptor, PublicKey};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Semaphore, mpsc};

/// Run one job to completion, reporting through `tracker`.
///
/// Any failure is published as ERROR before it is returned, so the RPP never
/// sees a job that stopped without saying so.
pub async fn run_job<S: StatusSink>(
    job: &JobDir,
    keys: &TpsKeys,
    enc: Arc<dyn Encryptor>,
    engine: Arc<dyn ComputeEngine>,
    tracker: &mut JobTracker<S>,
) -> Result<(), JobError> {
    let result = execute(job, keys, enc, engine, tracker).await;
    if let Err(e) = &result {
        tracing::warn!(job = %job.path().display(), error = %e, "job failed");
        if !tracker.state().is_terminal() {
            if let Err(publish) = tracker.advance(TpsState::Error, e.to_string()).await {
                tracing::error!(
                    job = %job.path().display(),
                    error = %publish,
                    "could not report job failure"
                );
            }
        }
    }
    result
}

async fn execute<S: StatusSink>(
    job: &JobDir,
    keys: &TpsKeys,
    enc: Arc<dyn Encryptor>,
    engine: Arc<dyn ComputeEngine>,
    tracker: &mut JobTracker<S>,
) -> Result<(), JobError> {
    tracker.advance(TpsState::Started, "").await?;

    let inputs = job.read_inputs().await?;
    let (key, opened) = open_submission(enc.as_ref(), keys.private_key(), &inputs.sealed)?;
    let reference = payload::decode_records(&inputs.reference)?;
    tracing::info!(
        session = %inputs.session,
        client_variants = opened.records.len(),
        reference_variants = reference.len(),
        algorithm = %inputs.algorithm,
        "job started"
    );

    let input = EngineInput {
        client: opened.records,
        reference,
        excluded: opened.excluded,
        algorithm: inputs.algorithm,
    };
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let compute = tokio::task::spawn_blocking(move || {
        engine.run(&input, &mut |details: String| {
            let _ = progress_tx.send(details);
        })
    });
    while let Some(details) = progress_rx.recv().await {
        tracker.advance(TpsState::Running, details).await?;
    }
    let results = compute
        .await
        .map_err(|e| JobError::Engine(e.to_string()))?
        .map_err(|e| JobError::Engine(e.to_string()))?;

    let sealed = seal_results(enc.as_ref(), &key, &results)?;
    job.write_results(&sealed).await?;
    tracker.advance(TpsState::Done, "").await?;
    tracing::info!(session = %inputs.session, "job done");
    Ok(())
}

/// An in-process TPS: keys, engine and a bounded job queue.
#[derive(Clone)]
pub struct Tps {
    keys: TpsKeys,
    enc: Arc<dyn Encryptor>,
    engine: Arc<dyn ComputeEngine>,
    max_jobs: usize,
    slots: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
}

impl Tps {
    pub fn new(
        keys: TpsKeys,
        enc: Arc<dyn Encryptor>,
        engine: Arc<dyn ComputeEngine>,
        max_jobs: usize,
    ) -> Self {
        let max_jobs = max_jobs.max(1);
        Self {
            keys,
            enc,
            engine,
            max_jobs,
            slots: Arc::new(Semaphore::new(max_jobs)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    /// Queue a job and run it once a slot frees up.
    ///
    /// Publishes PENDING with the number of jobs ahead of this one, running
    /// or queued, then the job's own lifecycle.
    pub async fn submit<S: StatusSink>(&self, job: JobDir, sink: S) -> Result<(), JobError> {
        let mut tracker = JobTracker::new(sink);
        let running = self.max_jobs.saturating_sub(self.slots.available_permits());
        let ahead = self.waiting.fetch_add(1, Ordering::SeqCst) + running;
        let queued = tracker.advance(TpsState::Pending, ahead.to_string()).await;
        let permit = match queued {
            Ok(_) => self.slots.clone().acquire_owned().await.ok(),
            Err(_) => None,
        };
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        queued?;
        let Some(_permit) = permit else {
            return Err(JobError::QueueClosed);
        };
        run_job(
            &job,
            &self.keys,
            self.enc.clone(),
            self.engine.clone(),
            &mut tracker,
        )
        .await
    }
}
