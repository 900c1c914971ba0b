mod config;
mod diff_cmd;
mod output;
mod replay;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tidemark_core::DiffMode;

use output::OutputFormat;
use replay::{ReplayOptions, View};

#[derive(Parser)]
#[command(
    name = "tidemark",
    version,
    about = "Replay and verify live AI-agent timeline streams"
)]
struct Cli {
    /// Config file (default: ~/.config/tidemark/tidemark.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a captured event stream into a message list
    Replay {
        /// JSONL capture, one stream event per line
        file: PathBuf,

        /// Canonical message list (JSON array) to verify the result against
        #[arg(long)]
        canonical: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "messages")]
        view: View,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Write every tapped snapshot to this file
        #[arg(long)]
        tap_export: Option<PathBuf>,

        /// Override the configured diff mode
        #[arg(long, value_enum)]
        diff_mode: Option<DiffModeArg>,

        /// Disable tapping for this run
        #[arg(long)]
        no_taps: bool,
    },

    /// Report representation drift in an exported tap file
    Diff {
        file: PathBuf,

        #[arg(long, value_enum)]
        diff_mode: Option<DiffModeArg>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the resolved configuration
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DiffModeArg {
    /// Compare the first two layers holding an event
    FirstTwo,
    /// Compare the first layer against every later one
    AgainstFirst,
}

impl From<DiffModeArg> for DiffMode {
    fn from(arg: DiffModeArg) -> Self {
        match arg {
            DiffModeArg::FirstTwo => DiffMode::FirstTwo,
            DiffModeArg::AgainstFirst => DiffMode::AgainstFirst,
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default().add_directive(tracing::Level::WARN.into())
        });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let cfg = match config::load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&cfg.logging.level);

    let result = match cli.command {
        Commands::Replay {
            file,
            canonical,
            view,
            format,
            tap_export,
            diff_mode,
            no_taps,
        } => {
            let mut options = ReplayOptions::from_config(&cfg, view);
            options.canonical = canonical;
            options.tap_export = tap_export;
            if let Some(mode) = diff_mode {
                options.diff_mode = mode.into();
            }
            if no_taps {
                options.taps = false;
            }
            replay::run_replay(&file, &options, format)
        }
        Commands::Diff {
            file,
            diff_mode,
            format,
        } => {
            let mode = diff_mode.map_or(cfg.taps.diff_mode, DiffMode::from);
            diff_cmd::run_diff(&file, mode, format)
        }
        Commands::Config => config::show_config(&cfg),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
