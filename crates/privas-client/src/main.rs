//! PrivAS command-line client.
//!
//! Run:
//!   privas --rpp 127.0.0.1:8700 config
//!   privas --rpp 127.0.0.1:8700 run --dataset FrEx --max-af 0.01 --genotypes cases.tsv

use anyhow::Context;
use clap::{Parser, Subcommand};
use privas_client::{ClientInput, RppClient, SessionParams, run_analysis};
use privas_core::OpensslEncryptor;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "privas", about = "PrivAS client")]
struct Cli {
    /// RPP address.
    #[arg(long, env = "PRIVAS_RPP", default_value = "127.0.0.1:8700")]
    rpp: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the RPP's datasets and TPS.
    Config,
    /// Run an association analysis.
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long)]
    dataset: String,
    /// Post-QC genotypes: variant, gene, comma-separated dosages.
    #[arg(long)]
    genotypes: PathBuf,
    /// Variants dropped by QC, one per line.
    #[arg(long)]
    excluded: Option<PathBuf>,
    #[arg(long, default_value_t = 0.01)]
    max_af: f64,
    #[arg(long)]
    max_af_subpop: Option<f64>,
    #[arg(long, default_value = "2.1.1")]
    gnomad_version: String,
    #[arg(long, default_value = "ALL")]
    subpopulation: String,
    #[arg(long, default_value = "missense_variant")]
    min_csq: String,
    #[arg(long)]
    limit_to_snvs: bool,
    #[arg(long)]
    bed_file: Option<String>,
    #[arg(long, default_value = "default")]
    qc_param: String,
    #[arg(long, default_value = "carrier-count")]
    algorithm: String,
    #[arg(long, default_value_t = 5)]
    poll_secs: u64,
    /// Write the results here instead of standard output.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("privas_client=warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = RppClient::new(cli.rpp);
    match cli.command {
        Command::Config => {
            let config = client.configuration().await?;
            println!("TPS: {}", config.tps_name);
            for dataset in config.datasets {
                println!("{}\t{}", dataset.name, dataset.description);
            }
        }
        Command::Run(args) => run(&client, args).await?,
    }
    Ok(())
}

async fn run(client: &RppClient, args: RunArgs) -> anyhow::Result<()> {
    let input = ClientInput::load(&args.genotypes, args.excluded.as_deref())
        .await
        .with_context(|| format!("loading {}", args.genotypes.display()))?;
    let params = SessionParams {
        dataset: args.dataset,
        gnomad_version: args.gnomad_version,
        max_af: args.max_af,
        subpopulation: args.subpopulation,
        max_af_subpop: args.max_af_subpop.unwrap_or(args.max_af),
        min_csq: args.min_csq,
        limit_to_snvs: args.limit_to_snvs,
        bed_file: args.bed_file,
        qc_param: args.qc_param,
    };

    let enc = OpensslEncryptor::default();
    let analysis = run_analysis(
        client,
        &enc,
        &params,
        &input,
        &args.algorithm,
        Duration::from_secs(args.poll_secs.max(1)),
        |session, status| match &status.details {
            Some(details) => eprintln!("[{session}] {} {details}", status.state),
            None => eprintln!("[{session}] {}", status.state),
        },
    )
    .await?;

    match args.output {
        Some(path) => tokio::fs::write(&path, &analysis.results)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{}", analysis.results),
    }
    Ok(())
}
