//! Shared CLI helpers and small reusable Clap fragments

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Options for the ferryd server binary
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Serve a flat directory of files over the ferry protocol")]
pub struct DaemonOpts {
    /// Bind address (host:port) [default: 127.0.0.1:65432]
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory to serve [default: server_files]
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// TOML config file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write sample files into the root if it is empty
    #[arg(long)]
    pub seed: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Options for the ferry client binary
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "List and download files from a ferry server")]
pub struct ClientOpts {
    /// Server address (host:port) [default: 127.0.0.1:65432]
    #[arg(long, short = 's', global = true)]
    pub server: Option<String>,

    /// TOML config file; flags override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// List the files offered by the server
    List,
    /// Download one or more files, one connection per file
    Get {
        /// Files to download
        #[arg(required = true)]
        files: Vec<String>,

        /// Destination directory
        #[arg(long, short = 'd', default_value = "client_downloads")]
        dest: PathBuf,

        /// LIST before each DOWNLOAD and fail early if the file is absent
        #[arg(long)]
        check_listing: bool,

        /// Print the SHA-256 of every completed file
        #[arg(long)]
        digest: bool,

        /// Append final task outcomes to this JSONL file
        #[arg(long = "log-file")]
        log_file: Option<PathBuf>,

        /// Do not draw progress bars
        #[arg(long, short = 'q')]
        quiet: bool,
    },
    /// Show outcomes recorded by `get --log-file`
    History {
        /// JSONL history file
        #[arg(long = "log-file")]
        log_file: PathBuf,

        /// Only show failed downloads
        #[arg(long)]
        failed: bool,
    },
}
