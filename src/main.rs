mod cli;
mod server;
mod tools;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use traitsense::config::TraitSenseConfig;

#[derive(Parser)]
#[command(
    name = "traitsense",
    version,
    about = "Semantic plant trait matching with a local embedding model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Sse,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server
    Serve {
        /// Transport to serve on (defaults to the configured one)
        #[arg(long, value_enum)]
        transport: Option<Transport>,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Build the precomputed trait artifacts from a family dataset
    Precompute {
        /// JSON array of family records
        #[arg(long)]
        families: PathBuf,
        /// Output directory for precomputedTraits.json and precomputedEmbeddings.bin
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = traitsense::precompute::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Rank families for a free-text plant description
    Identify {
        query: String,
        /// Minimum similarity for a trait to count (defaults to config)
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Judge a quiz answer against accepted answers
    Judge {
        #[arg(long)]
        answer: String,
        /// Accepted answers, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        accept: Vec<String>,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Check model files and precomputed artifacts
    Doctor,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.traitsense/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TraitSenseConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { transport } => {
            let sse = match transport {
                Some(Transport::Sse) => true,
                Some(Transport::Stdio) => false,
                None => config.server.transport == "sse",
            };
            if sse {
                server::serve_sse(config).await?;
            } else {
                server::serve_stdio(config).await?;
            }
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
        Command::Precompute {
            families,
            out,
            batch_size,
        } => {
            cli::precompute::precompute(&config, &families, &out, batch_size).await?;
        }
        Command::Identify { query, threshold } => {
            cli::identify::identify(&config, &query, threshold).await?;
        }
        Command::Judge {
            answer,
            accept,
            threshold,
        } => {
            cli::judge::judge(&config, &answer, &accept, threshold).await?;
        }
        Command::Doctor => {
            cli::doctor::doctor(&config).await?;
        }
    }

    Ok(())
}
