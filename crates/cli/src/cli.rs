use crate::logging::{LogLevel, TracingFormat};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "pkgcache")]
#[command(about = "Inspect and maintain the package download cache")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        global = true,
        env = "PKGCACHE_DIR",
        help = "Cache directory (defaults to the platform cache location)"
    )]
    pub cache_dir: Option<PathBuf>,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(
        long,
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,

    #[arg(long, global = true, help = "Print results as JSON")]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Print the cache key for a URL")]
    Hash {
        #[arg(help = "Source URL")]
        url: Url,
    },
    #[command(about = "Run a full integrity check on a zip archive")]
    Check {
        #[arg(help = "Archive to check")]
        archive: PathBuf,
    },
    #[command(about = "Print the cached file for a URL")]
    Find {
        #[arg(help = "Source URL")]
        url: Url,
        #[arg(long, help = "Integrity-check the archive, purging it if corrupt")]
        validate: bool,
    },
    #[command(about = "Show the number and total size of cached files")]
    Info,
    #[command(about = "List cached files")]
    List,
    #[command(about = "Delete every cached file")]
    Clear,
    #[command(about = "Move the files of another download directory into the cache")]
    Import {
        #[arg(help = "Directory to consolidate")]
        dir: PathBuf,
    },
    #[command(about = "Evict the oldest files until the cache fits a size limit")]
    Trim {
        #[arg(long, help = "Maximum cache size in bytes")]
        max_bytes: u64,
    },
}
