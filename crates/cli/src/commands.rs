//! Command execution
#![expect(clippy::print_stdout, reason = "command results are reported on stdout")]

use crate::cli::{Cli, Commands};
use miette::{IntoDiagnostic, Result, miette};
use pkgcache::{CacheConfig, CacheStore, check_archive, hash_url_with};
use serde::Serialize;

/// Print `value` as JSON, or its human-readable rendering
fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    } else {
        println!("{}", human());
    }
    Ok(())
}

fn open_cache(cli: &Cli, config: &CacheConfig) -> Result<CacheStore> {
    let mut config = config.clone();
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    // One-shot commands never benefit from a watcher
    config.watch = false;
    Ok(CacheStore::from_config(&config)?)
}

/// Run the parsed command
pub fn run(cli: &Cli) -> Result<()> {
    let config = CacheConfig::from_env()?;
    tracing::debug!(command = ?cli.command, "Running command");

    match &cli.command {
        Commands::Hash { url } => {
            let key = hash_url_with(url, config.key_length);
            emit(cli.json, &serde_json::json!({ "url": url.as_str(), "key": key.as_str() }), || {
                key.to_string()
            })
        }
        Commands::Check { archive } => {
            let check = check_archive(Some(archive));
            emit(cli.json, &check, || {
                if check.ok {
                    format!("{}: ok", archive.display())
                } else {
                    format!("{}: {}", archive.display(), check.reason)
                }
            })?;
            if check.ok {
                Ok(())
            } else {
                Err(miette!("archive failed integrity check"))
            }
        }
        Commands::Find { url, validate } => {
            let cache = open_cache(cli, &config)?;
            let found = if *validate {
                cache.find_valid_archive(url)?
            } else {
                cache.find_file(url, None)?
            };
            match found {
                Some(path) => emit(cli.json, &path, || path.display().to_string()),
                None => Err(miette!("{url} is not cached")),
            }
        }
        Commands::Info => {
            let cache = open_cache(cli, &config)?;
            let info = cache.size_info()?;
            emit(cli.json, &info, || {
                format!(
                    "{}: {} files, {} bytes",
                    cache.cache_dir().display(),
                    info.file_count,
                    info.total_bytes
                )
            })
        }
        Commands::List => {
            let cache = open_cache(cli, &config)?;
            let entries = cache.entries()?;
            emit(cli.json, &entries, || {
                entries
                    .iter()
                    .map(|e| format!("{:>12}  {}  {}", e.size, e.modified.to_rfc3339(), e.path.display()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Commands::Clear => {
            let cache = open_cache(cli, &config)?;
            let report = cache.remove_all();
            emit(cli.json, &report, || {
                format!("removed {} files, {} failed", report.removed, report.failed)
            })
        }
        Commands::Import { dir } => {
            let cache = open_cache(cli, &config)?;
            let report = cache.move_from(dir)?;
            emit(cli.json, &report, || {
                format!(
                    "moved {} files, discarded {} duplicates",
                    report.moved, report.discarded
                )
            })
        }
        Commands::Trim { max_bytes } => {
            let cache = open_cache(cli, &config)?;
            let report = cache.enforce_size_limit(*max_bytes)?;
            emit(cli.json, &report, || {
                format!(
                    "evicted {} files, freed {} bytes",
                    report.evicted, report.bytes_freed
                )
            })
        }
    }
}
