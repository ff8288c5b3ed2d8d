//! CLI for the voodoo transfer engine and queue.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use voodoo_core::config;

use commands::{run_completions, run_fetch, run_queue, FetchArgs, QueueArgs};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "voodoo")]
#[command(about = "voodoo: resumable range downloads under a concurrency-limited queue", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one URL, resuming from whatever the destination already holds.
    Fetch {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Destination file (default: last URL path segment in the current directory).
        dest: Option<PathBuf>,
        /// Discard an existing destination instead of resuming it.
        #[arg(long)]
        overwrite: bool,
        /// Decode a gzip body on the fly (always restarts from byte 0).
        #[arg(long)]
        gunzip: bool,
    },

    /// Download several URLs through one queue and wait for all of them.
    Queue {
        /// Directory the files are written to (default: current directory).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Override the fast profile's download ceiling.
        #[arg(long, value_name = "N")]
        max_downloads: Option<usize>,
        /// Print the final queue snapshot as JSON.
        #[arg(long)]
        json: bool,
        /// URLs to download.
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Print a shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        if let CliCommand::Completions { shell } = cli.command {
            run_completions(shell);
            return Ok(());
        }
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                url,
                dest,
                overwrite,
                gunzip,
            } => {
                run_fetch(
                    &cfg,
                    FetchArgs {
                        url,
                        dest,
                        overwrite,
                        gunzip,
                    },
                )
                .await?
            }
            CliCommand::Queue {
                dir,
                max_downloads,
                json,
                urls,
            } => {
                let dir = match dir {
                    Some(d) => d,
                    None => std::env::current_dir()?,
                };
                run_queue(
                    &cfg,
                    QueueArgs {
                        dir,
                        max_downloads,
                        json,
                        urls,
                    },
                )
                .await?
            }
            CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
