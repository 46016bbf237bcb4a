mod cli;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;

use cli::{BackupCommands, Cli, Commands, ConfigCommands};
use shopdir_backup::core::BackupEngine;
use shopdir_backup::utils::{filename_timestamp, format_bytes, generate_hex_string, remove_path_quietly, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    shopdir_backup::init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Backup { command } => {
            handle_backup(command, config).await?;
        }
        Commands::Config { command } => {
            handle_config(command, config, cli.config)?;
        }
        #[cfg(feature = "server")]
        Commands::Serve { port, host, cors } => {
            let engine = std::sync::Arc::new(BackupEngine::from_config(config)?);
            shopdir_backup::server::run(host, port, cors, engine).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}

async fn handle_backup(command: BackupCommands, config: AppConfig) -> Result<()> {
    let engine = BackupEngine::from_config(config)?;

    match command {
        BackupCommands::Create { output, data_only } => {
            if data_only {
                create_data_backup(&engine, output).await
            } else {
                create_full_backup(&engine, output).await
            }
        }
        BackupCommands::Restore { file, delete_archive } => {
            restore_backup(&engine, &file, delete_archive).await
        }
        BackupCommands::Stats => {
            let stats = engine.backup.stats().await?;

            println!("Backup Estimate\n");
            println!("{:<20} {}", "Shops:", stats.total_shops);
            println!("{:<20} {}", "Logos:", stats.logo_count);
            println!("{:<20} {}", "Map images:", stats.map_count);
            println!("{:<20} {}", "Estimated size:", stats.estimated_size);
            Ok(())
        }
    }
}

async fn create_full_backup(engine: &BackupEngine, output: Option<PathBuf>) -> Result<()> {
    // Store errors surface here, before an output file exists
    let shops = engine.backup.load_shops().await?;

    // "-" streams the archive to stdout
    if output.as_deref() == Some(Path::new("-")) {
        engine.backup.write_full_backup(shops, tokio::io::stdout()).await?;
        return Ok(());
    }

    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!("shop-backup-{}.tar.gz", filename_timestamp(Utc::now())))
    });
    let file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;

    println!("Creating full backup of {} shops...", shops.len());
    let summary = match engine.backup.write_full_backup(shops, file).await {
        Ok(summary) => summary,
        Err(e) => {
            remove_path_quietly(&path).ok();
            return Err(e).context("Backup failed, partial archive removed");
        }
    };

    println!("✓ Backup written to {}", path.display());
    println!("  Shops:   {}", summary.shops);
    println!("  Logos:   {}", summary.logos);
    println!("  Maps:    {}", summary.maps);
    if summary.skipped > 0 {
        println!("  Skipped: {} image(s) could not be fetched", summary.skipped);
    }
    println!("  Size:    {}", format_bytes(summary.bytes_written));

    Ok(())
}

async fn create_data_backup(engine: &BackupEngine, output: Option<PathBuf>) -> Result<()> {
    let manifest = engine.backup.data_only_backup().await?;

    if output.as_deref() == Some(Path::new("-")) {
        use tokio::io::AsyncWriteExt;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&manifest).await?;
        stdout.flush().await?;
        return Ok(());
    }

    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!("shop-data-{}.json", filename_timestamp(Utc::now())))
    });
    tokio::fs::write(&path, &manifest)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✓ Shop data written to {}", path.display());
    Ok(())
}

async fn restore_backup(engine: &BackupEngine, file: &Path, delete_archive: bool) -> Result<()> {
    if !file.is_file() {
        bail!("Backup file not found: {}", file.display());
    }

    // Restoring consumes the archive, so work on a copy unless told otherwise
    let archive = if delete_archive {
        file.to_path_buf()
    } else {
        let scratch = &engine.config.scratch_dir;
        tokio::fs::create_dir_all(scratch)
            .await
            .with_context(|| format!("Failed to create scratch dir {}", scratch.display()))?;
        let copy = scratch.join(format!(
            "restore-input-{}-{}.tar.gz",
            filename_timestamp(Utc::now()),
            generate_hex_string(8)
        ));
        tokio::fs::copy(file, &copy)
            .await
            .with_context(|| format!("Failed to copy {}", file.display()))?;
        copy
    };

    println!("Restoring from {}...", file.display());
    info!(archive = %archive.display(), "Restore requested");
    let report = engine.restore.restore_archive(&archive).await;
    let outcome = &report.outcome;

    if !report.success {
        let cause = outcome.errors.first().cloned().unwrap_or_default();
        bail!("Restore failed: {}", cause);
    }

    println!("✓ Restore complete");
    println!("  Shops restored: {}", outcome.shops_restored);
    println!("  Logos restored: {}", outcome.logos_restored);
    println!("  Maps restored:  {}", outcome.maps_restored);

    if !outcome.errors.is_empty() {
        println!("\n⚠ {} problem(s) during restore:", outcome.errors.len());
        for error in &outcome.errors {
            println!("  - {}", error);
        }
    }

    Ok(())
}

fn handle_config(command: ConfigCommands, config: AppConfig, override_path: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);

            let problems = config.validate();
            if !problems.is_empty() {
                println!("⚠ Configuration problems:");
                for problem in problems {
                    println!("  - {}", problem);
                }
            }
        }
        ConfigCommands::Path => {
            let path = match override_path {
                Some(path) => path,
                None => AppConfig::config_path()?,
            };
            println!("{}", path.display());
        }
        #[cfg(feature = "server")]
        ConfigCommands::GenerateToken => {
            let token = shopdir_backup::server::auth::generate_token();
            println!("{}", token);
            eprintln!("Add to your environment: export {}=\"{}\"", shopdir_backup::server::auth::ADMIN_TOKEN_ENV, token);
        }
    }

    Ok(())
}
