//! Dirwatch CLI - dw command

use clap::{Parser, Subcommand};
use anyhow::Result;
use std::path::PathBuf;

mod cmd;
mod logging;
mod settings;

/// Dirwatch - Watch directories and report file changes
#[derive(Parser)]
#[command(name = "dw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/dirwatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch one or more directories and print changes until Ctrl-C
    Watch {
        /// Directories to watch
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// Only report files whose name contains this text
        #[arg(long)]
        contains: Option<String>,

        /// Detection backend
        #[arg(long, value_enum)]
        backend: Option<cmd::watch::BackendArg>,

        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep the file writer flushing until exit
    let _log_guard = logging::init(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Watch { dirs, contains, backend, interval_ms, json } => {
            let options = cmd::watch::WatchOptions {
                dirs,
                contains,
                backend,
                interval_ms,
                json,
            };
            cmd::watch::run(cli.config.as_deref(), options).await
        }
        Commands::Config => cmd::config::run(cli.config.as_deref()).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmd::watch::BackendArg;

    #[test]
    fn test_backend_parsed_at_the_command_line() {
        let cli = Cli::try_parse_from(["dw", "watch", "--backend", "native", "d"]).unwrap();
        match cli.command {
            Commands::Watch { backend, .. } => assert_eq!(backend, Some(BackendArg::Native)),
            Commands::Config => panic!("expected watch"),
        }

        assert!(Cli::try_parse_from(["dw", "watch", "--backend", "inotify", "d"]).is_err());
    }
}
