//! Resumio CLI - resumable HTTP downloads
//!
//! Fetches a URL to a file, transparently resuming interrupted transfers
//! without letting the remote object change underneath.

mod commands;
mod config;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Resumio - resumable HTTP downloads
#[derive(Parser)]
#[command(name = "resumio")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a JSON settings file
    #[arg(long, env = "RESUMIO_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL to a file
    Get {
        /// URL to download
        url: String,

        /// Output file path (defaults to the last URL path segment)
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,

        /// First byte to download
        #[arg(long, default_value_t = 0)]
        start: u64,

        /// Number of bytes to download (defaults to the rest of the object)
        #[arg(long)]
        length: Option<u64>,

        /// Maximum number of resumptions (0 disables resuming)
        #[arg(long, env = "RESUMIO_MAX_RETRIES")]
        max_retries: Option<u32>,

        /// Base delay in milliseconds before a resumption
        #[arg(long, env = "RESUMIO_RETRY_DELAY_MS")]
        retry_delay_ms: Option<u64>,

        /// Use the blocking read loop instead of the async stream
        #[arg(long)]
        blocking: bool,
    },

    /// Show settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective settings
    Show,

    /// Print the default settings file location
    Path,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,resumio_core=debug,resumio=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = config::load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Get {
            url,
            out,
            start,
            length,
            max_retries,
            retry_delay_ms,
            blocking,
        } => {
            let settings = config::apply_overrides(settings, max_retries, retry_delay_ms);
            let request = commands::GetRequest {
                url,
                out,
                start,
                length,
                blocking,
            };
            commands::get(request, settings, cli.output).await?
        }

        Commands::Config { action } => commands::config_action(action, &settings, cli.output)?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "resumio", &mut std::io::stdout());
        }
    }

    Ok(())
}
