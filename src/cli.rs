/// CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Version string with the build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "shopdir-backup")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Backup operations
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Run HTTP API server mode
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Enable CORS for cross-origin requests
        #[arg(long)]
        cors: bool,
    },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a backup archive (or a JSON file with --data-only)
    Create {
        /// Output file (defaults to a timestamped name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write shop records only, no images
        #[arg(long)]
        data_only: bool,
    },

    /// Restore shops and images from a .tar.gz backup
    Restore {
        /// Backup archive
        file: PathBuf,

        /// Restore the file in place and delete it afterwards
        #[arg(long)]
        delete_archive: bool,
    },

    /// Show what a full backup would contain
    Stats,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Print the config file location
    Path,

    /// Generate a token for SHOPDIR_ADMIN_TOKEN
    #[cfg(feature = "server")]
    GenerateToken,
}
