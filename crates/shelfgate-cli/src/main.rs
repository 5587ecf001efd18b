use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod library;
mod store;
mod views;

use config::Config;
use engine::CancelFlag;
use library::Library;
use store::Store;

#[derive(Parser)]
#[command(name = "shelfgate", about = "Face-verified library kiosk")]
struct Cli {
    /// TOML config file; SHELFGATE_* variables override it
    #[arg(long, global = true, env = "SHELFGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person with their face
    Register {
        /// Name to register under
        #[arg(short, long)]
        name: String,
        /// Use a photo instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Run the issue/return kiosk
    Kiosk,
    /// List registered people and what they hold
    Records {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List video capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let mut stdout = std::io::stdout();

    if let Commands::Devices = cli.command {
        return views::devices(&mut stdout);
    }

    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let mut library = Library::new(store, config.match_tolerance)?;

    match cli.command {
        Commands::Register { name, image } => {
            let frames = if image.is_some() { 1 } else { config.frames_per_enroll };
            let engine = views::open_engine(&config, image.as_deref())?;
            views::register(&mut library, &engine, &name, frames, &mut stdout).await?;
        }
        Commands::Kiosk => {
            let engine = views::open_engine(&config, None)?;
            let cancel = CancelFlag::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("interrupted");
                        cancel.raise();
                    }
                }
            });
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            let mut prompt = views::Prompt::new(input, cancel);
            views::kiosk(&mut library, &engine, &config, &mut prompt, &mut stdout).await?;
            println!("Goodbye.");
        }
        Commands::Records { json } => views::records(&library, json, &mut stdout)?,
        Commands::Devices => {}
    }

    Ok(())
}
