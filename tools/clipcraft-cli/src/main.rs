//! ClipCraft CLI: trim a video, caption it, and export the clip.
//!
//! Usage:
//!   clipcraft export [INPUT] [OPTIONS]   Export a trimmed clip
//!   clipcraft info [INPUT]               Show source information
//!   clipcraft check                      List output types this build can encode

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "clipcraft",
    about = "Trim, caption, and export video clips",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the video comes from.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Input video file
    #[arg(required_unless_present = "synthetic")]
    input: Option<PathBuf>,

    /// Use a generated test pattern of the given length (seconds) instead of a file
    #[arg(long, value_name = "SECS", conflicts_with = "input")]
    synthetic: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a trimmed clip
    Export {
        #[command(flatten)]
        source: SourceArgs,

        /// Clip start (seconds)
        #[arg(long, default_value = "0")]
        start: f64,

        /// Clip end (seconds, defaults to the end of the source)
        #[arg(long)]
        end: Option<f64>,

        /// Export without audio
        #[arg(long)]
        mute: bool,

        /// Caption drawn on every frame
        #[arg(long, value_name = "TEXT")]
        overlay: Option<String>,

        /// Where to save the clip (defaults to the suggested file name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show source information
    Info {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// List output types and whether this build can encode them
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = clipcraft_common::config::AppConfig::load();

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    clipcraft_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Export {
            source,
            start,
            end,
            mute,
            overlay,
            output,
        } => {
            let options = commands::export::ExportOptions {
                start,
                end,
                mute,
                overlay,
                output,
            };
            commands::export::run(&config, source, options).await
        }
        Commands::Info { source } => commands::info::run(&config, source).await,
        Commands::Check => commands::check::run(&config),
    }
}
