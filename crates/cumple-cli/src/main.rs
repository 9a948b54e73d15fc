mod cmd;
mod output;
mod root;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cumple",
    about = "Birthday reminders over WhatsApp Web, driven by a roster spreadsheet",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root holding cumple.yaml (default: auto-detect from cwd)
    #[arg(long, global = true, env = "CUMPLE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send today's due reminders and record them in the roster
    Run {
        /// Evaluate as if today were this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Open the messaging session and save the pairing snapshot, sending nothing
    Warmup,

    /// List birthdays inside the window without sending or writing anything
    Preview {
        /// Evaluate as if today were this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Serve the HTTP trigger endpoints
    Serve {
        /// Port to listen on
        #[arg(long, env = "PORT", default_value = "10000")]
        port: u16,
    },

    /// Remove stale browser locks from the profile directory
    ClearLocks,

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } | Commands::Warmup | Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Run { date } => cmd::run::run(&root, date, cli.json),
        Commands::Warmup => cmd::warmup::run(&root, cli.json),
        Commands::Preview { date } => cmd::preview::run(&root, date, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::ClearLocks => cmd::clear_locks::run(&root, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
