use std::path::PathBuf;

use anyhow::Context;
use arabic_hwr::commands;
use arabic_hwr::config::Config;
use arabic_hwr::ingest;
use arabic_hwr::state::AppState;
use clap::{Parser, Subcommand};
use log::info;

/// Backend for Arabic handwritten letter recognition.
#[derive(Parser, Debug)]
#[command(name = "arabic-hwr", version)]
struct Cli
{
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command
{
    /// Run the HTTP API
    Serve
    {
        #[arg(long, env = "HWR_BIND", default_value = "0.0.0.0:8000")]
        bind: String,
    },
    /// Preprocess a directory of letter images into the store
    Ingest
    {
        /// Dataset id; 0 is the baseline merged into every training run
        #[arg(long)]
        dsid: i64,
        #[arg(long)]
        path: PathBuf,
        /// Number of copies stored per image
        #[arg(long, default_value_t = 1)]
        weight: usize,
    },
    /// Train the model for one dataset id
    Train
    {
        #[arg(long)]
        dsid: i64,
    },
    /// Delete every stored sample
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()>
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let state = AppState::from_config(&cli.config).context("Failed to initialize state")?;

    match cli.command {
        Command::Serve { bind } => {
            info!(
                "Using database {:?}, models in {:?}, {:?} feature scaling",
                cli.config.db_path, cli.config.model_dir, cli.config.feature_scaling
            );
            commands::serve(&bind, state).await?;
        }
        Command::Ingest { dsid, path, weight } => {
            let report = tokio::task::spawn_blocking(move || {
                ingest::load_and_store_data(state.store.as_ref(), &path, dsid, weight)
            })
            .await??;
            info!("{} files, {} records inserted, {} skipped", report.total_files, report.inserted, report.skipped);
        }
        Command::Train { dsid } => {
            let report = tokio::task::spawn_blocking(move || state.trainer.train(state.store.as_ref(), dsid)).await??;
            info!("Model written to {} ({:.3} training accuracy)", report.model_path, report.train_accuracy);
        }
        Command::Clear => {
            let deleted = state.store.clear_all()?;
            info!("Deleted {} samples", deleted);
        }
    }

    Ok(())
}
