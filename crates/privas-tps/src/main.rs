//! Standalone TPS.
//!
//! Run:
//!   privas-tps keygen --keys /srv/tps/keys
//!   privas-tps run /srv/rpp/sessions/<id>/job --keys /srv/tps/keys --push 127.0.0.1:8700

use anyhow::Context;
use clap::{Parser, Subcommand};
use privas_core::wire::Framing;
use privas_core::{DEFAULT_RSA_BITS, OpensslEncryptor};
use privas_tps::{CarrierCountEngine, FileStatusSink, JobDir, RemoteStatusSink, Tps, TpsKeys};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "privas-tps", about = "PrivAS third-party server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the TPS keypair.
    Keygen {
        #[arg(long, env = "PRIVAS_TPS_KEYS")]
        keys: PathBuf,
        #[arg(long, default_value_t = DEFAULT_RSA_BITS)]
        bits: u32,
    },
    /// Run one prepared job directory.
    Run {
        job: PathBuf,
        #[arg(long, env = "PRIVAS_TPS_KEYS")]
        keys: PathBuf,
        /// Also push every status change to this RPP.
        #[arg(long)]
        push: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("privas_tps=info".parse()?))
        .init();

    match Cli::parse().command {
        Command::Keygen { keys, bits } => {
            let enc = OpensslEncryptor::new(bits);
            TpsKeys::generate(&enc, &keys)
                .await
                .with_context(|| format!("generating keys in {}", keys.display()))?;
            Ok(())
        }
        Command::Run { job, keys, push } => {
            let keys = TpsKeys::load(&keys)
                .await
                .with_context(|| format!("loading keys from {}", keys.display()))?;
            let tps = Tps::new(
                keys,
                Arc::new(OpensslEncryptor::default()),
                Arc::new(CarrierCountEngine::default()),
                1,
            );
            let job = JobDir::new(job);
            let file = FileStatusSink::new(job.clone());
            match push {
                Some(rpp) => {
                    let session = job.session().await.context("reading job session")?;
                    let remote = RemoteStatusSink::new(rpp, session, Framing::default());
                    tps.submit(job, (file, remote)).await?;
                }
                None => tps.submit(job, file).await?,
            }
            Ok(())
        }
    }
}
