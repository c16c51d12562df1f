// ABOUTME: Handlers for each reelbox subcommand
// ABOUTME: Thin layer over the sandbox provider that formats results for the terminal

use anyhow::{bail, Context, Result};
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use reelbox_sandbox::{
    sandbox_provider, FileType, IdleReaper, RunOptions, SandboxInstance, SandboxProvider,
    SandboxSettings, SandboxStatus,
};

use crate::Commands;

/// Run one command; the returned value is the process exit code
pub async fn handle_command(command: Commands, json: bool) -> Result<i32> {
    let provider = sandbox_provider().context("Failed to initialise sandbox backend")?;

    match command {
        Commands::Create { project, template } => {
            let instance = provider.create(&project, template).await?;
            print_instance(&instance, json)?;
        }
        Commands::Status { sandbox_id } => match provider.get_instance(&sandbox_id).await? {
            Some(instance) => print_instance(&instance, json)?,
            None => {
                eprintln!("{}", format!("Sandbox {} not found", sandbox_id).yellow());
                return Ok(1);
            }
        },
        Commands::Write {
            sandbox_id,
            path,
            file,
            content,
        } => {
            let bytes = match (file, content) {
                (Some(file), _) => tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("Failed to read {}", file.display()))?,
                (None, Some(content)) => content.into_bytes(),
                (None, None) => {
                    let mut buf = Vec::new();
                    tokio::io::stdin()
                        .read_to_end(&mut buf)
                        .await
                        .context("Failed to read stdin")?;
                    buf
                }
            };
            provider.write_binary(&sandbox_id, &path, &bytes).await?;
            if !json {
                println!("{} Wrote {} bytes to {}", "✓".green(), bytes.len(), path.cyan());
            }
        }
        Commands::Read { sandbox_id, path } => {
            let bytes = provider.read_file_raw(&sandbox_id, &path).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&bytes).await?;
            stdout.flush().await?;
        }
        Commands::Ls {
            sandbox_id,
            path,
            recursive,
        } => {
            let files = provider.list_files(&sandbox_id, &path, recursive).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else if files.is_empty() {
                println!("{}", "No files found".dimmed());
            } else {
                for file in &files {
                    match file.file_type {
                        FileType::Directory => println!("{}/", file.path.blue().bold()),
                        FileType::File => println!(
                            "{:<60} {}",
                            file.path,
                            file.size.map(|s| s.to_string()).unwrap_or_default().dimmed()
                        ),
                    }
                }
            }
        }
        Commands::Exec {
            sandbox_id,
            command,
            background,
            timeout_ms,
        } => {
            let options = RunOptions {
                background,
                timeout: timeout_ms.map(Duration::from_millis),
            };
            let result = provider
                .run_command(&sandbox_id, &command.join(" "), options)
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", result.stdout);
                eprint!("{}", result.stderr);
                if background {
                    eprintln!("{}", "Dispatched in background".dimmed());
                }
            }
            return Ok(result.exit_code);
        }
        Commands::Upload {
            sandbox_id,
            url,
            dest,
        } => {
            let result = provider.upload_media(&sandbox_id, &url, &dest).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.success {
                let size = result.size.map(|s| format!(" ({} bytes)", s)).unwrap_or_default();
                println!("{} Fetched {} into {}{}", "✓".green(), url, dest.cyan(), size);
            }
            if !result.success {
                bail!(
                    "Media fetch failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
        Commands::Export {
            sandbox_id,
            output,
            paths,
        } => {
            let paths = (!paths.is_empty()).then_some(paths);
            let archive = provider
                .export_snapshot(&sandbox_id, paths.as_deref())
                .await?;
            tokio::fs::write(&output, &archive)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            if !json {
                println!(
                    "{} Saved {} bytes to {}",
                    "✓".green(),
                    archive.len(),
                    output.display().to_string().cyan()
                );
            }
        }
        Commands::Import {
            sandbox_id,
            archive,
        } => {
            let bytes = tokio::fs::read(&archive)
                .await
                .with_context(|| format!("Failed to read {}", archive.display()))?;
            if !provider.import_snapshot(&sandbox_id, &bytes).await? {
                bail!("Sandbox {} could not extract the archive", sandbox_id);
            }
            if !json {
                println!("{} Restored {}", "✓".green(), archive.display());
            }
        }
        Commands::Destroy { sandbox_id } => {
            provider.destroy(&sandbox_id).await?;
            if !json {
                println!("{} Destroyed {}", "✓".green(), sandbox_id);
            }
        }
        Commands::Reap {
            sandbox_ids,
            watch,
            idle_secs,
        } => reap(provider, sandbox_ids, watch, idle_secs, json).await?,
        Commands::Check => {
            let available = provider.is_available().await;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "backend": provider.kind(), "available": available })
                );
            } else if available {
                println!("{} {} backend is available", "✓".green(), provider.kind());
            } else {
                println!("{} {} backend is not reachable", "✗".red(), provider.kind());
            }
            if !available {
                return Ok(1);
            }
        }
    }

    Ok(0)
}

async fn reap(
    provider: Arc<dyn SandboxProvider>,
    sandbox_ids: Vec<String>,
    watch: bool,
    idle_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    let mut lifecycle = SandboxSettings::from_env()?.lifecycle;
    if let Some(secs) = idle_secs {
        lifecycle.idle_timeout = Duration::from_secs(secs);
    }

    // Adopted sandboxes count as idle since their recorded creation
    for id in &sandbox_ids {
        if provider.get_instance(id).await?.is_none() {
            eprintln!("{}", format!("Sandbox {} not found, skipping", id).yellow());
        }
    }

    let reaper = IdleReaper::from_settings(provider, &lifecycle);
    if watch {
        let handle = reaper.spawn();
        info!(adopted = sandbox_ids.len(), "Watching for idle sandboxes, press Ctrl+C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        handle.stop();
        return Ok(());
    }

    let report = reaper.sweep().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for id in &report.destroyed {
            println!("{} Reaped {}", "✓".green(), id);
        }
        for (id, error) in &report.failed {
            println!("{} {}: {}", "✗".red(), id, error);
        }
        if report.is_empty() {
            println!("{}", "Nothing idle to reap".dimmed());
        }
    }
    Ok(())
}

fn print_instance(instance: &SandboxInstance, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(instance)?);
        return Ok(());
    }

    let status = match instance.status {
        SandboxStatus::Ready => instance.status.to_string().green(),
        SandboxStatus::Busy | SandboxStatus::Creating => instance.status.to_string().yellow(),
        SandboxStatus::Destroyed | SandboxStatus::Error => instance.status.to_string().red(),
    };
    println!("{}", format!("Sandbox {}", instance.id).blue().bold());
    println!("  {:<10} {}", "Project:", instance.project_id);
    println!("  {:<10} {}", "Template:", instance.template);
    println!("  {:<10} {}", "Status:", status);
    if let Some(endpoint) = instance.endpoint() {
        println!("  {:<10} {}", "Preview:", endpoint.cyan());
    }
    println!("  {:<10} {}", "Created:", instance.created_at.to_rfc3339());
    Ok(())
}
