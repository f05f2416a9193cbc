//! PrivAS Reference Panel Provider.
//!
//! Run:
//!   privas-rpp --config /etc/privas/rpp.toml
//!   PRIVAS_LISTEN=0.0.0.0:8700 privas-rpp --data-dir /var/lib/privas

use anyhow::Context;
use clap::Parser;
use privas_core::OpensslEncryptor;
use privas_rpp::{Config, LocalLauncher, Rpp, TsvExtractor, server};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "privas-rpp", about = "PrivAS Reference Panel Provider")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "PRIVAS_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "PRIVAS_LISTEN")]
    listen: Option<SocketAddr>,
    #[arg(long, env = "PRIVAS_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("privas_rpp=info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let enc = Arc::new(OpensslEncryptor::new(config.rsa_bits));
    let launcher = LocalLauncher::from_dir(&config.tps_dir, enc.clone(), config.max_jobs)
        .await
        .with_context(|| format!("loading TPS keys from {}", config.tps_dir.display()))?;
    let extractor = TsvExtractor::new(&config.datasets_dir, config.progress_every);
    tracing::info!(
        data_dir = %config.data_dir.display(),
        datasets_dir = %config.datasets_dir.display(),
        tps = %config.tps_name,
        "starting RPP"
    );

    let sweep_interval = config.sweep_interval();
    let rpp = Arc::new(Rpp::new(config, Arc::new(extractor), Arc::new(launcher), enc));
    server::spawn_sweeper(rpp.clone(), sweep_interval);
    server::run(rpp).await
}
