// ABOUTME: Entry point for the reelbox CLI
// ABOUTME: Parses commands, sets up logging and dispatches to the sandbox provider

use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;

use reelbox_config::constants::RUST_LOG;
use reelbox_sandbox::Template;

mod commands;

#[derive(Parser)]
#[command(name = "reelbox")]
#[command(about = "Reelbox CLI - isolated sandboxes for rendering agent workloads")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of human output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a sandbox for a project
    Create {
        /// Project the sandbox belongs to
        #[arg(short, long)]
        project: String,
        /// remotion, motion-canvas or manim
        #[arg(short, long, value_parser = parse_template)]
        template: Template,
    },
    /// Show a sandbox, reconnecting to it if this process has not seen it yet
    Status {
        sandbox_id: String,
    },
    /// Write a file inside the sandbox (reads stdin when no source is given)
    Write {
        sandbox_id: String,
        path: String,
        /// Local file to upload
        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,
        /// Inline text content
        #[arg(short, long)]
        content: Option<String>,
    },
    /// Print a file from the sandbox
    Read {
        sandbox_id: String,
        path: String,
    },
    /// List files under a sandbox path
    Ls {
        sandbox_id: String,
        #[arg(default_value = ".")]
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Run a shell command in the sandbox working directory
    Exec {
        sandbox_id: String,
        /// Command line, passed to the sandbox shell
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Dispatch without waiting for completion
        #[arg(short, long)]
        background: bool,
        /// Foreground timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Have the sandbox fetch a media file from a URL
    Upload {
        sandbox_id: String,
        url: String,
        dest: String,
    },
    /// Save the project directories as a gzip tar archive
    Export {
        sandbox_id: String,
        /// Output archive path
        #[arg(short, long)]
        output: PathBuf,
        /// Paths to include instead of the template defaults
        #[arg(long = "path")]
        paths: Vec<String>,
    },
    /// Restore a gzip tar archive into the sandbox
    Import {
        sandbox_id: String,
        archive: PathBuf,
    },
    /// Tear a sandbox down
    Destroy {
        sandbox_id: String,
    },
    /// Run the idle reaper over the given sandboxes
    Reap {
        /// Sandboxes to adopt before sweeping
        sandbox_ids: Vec<String>,
        /// Keep sweeping on the configured interval until interrupted
        #[arg(short, long)]
        watch: bool,
        /// Override the idle threshold in seconds
        #[arg(long)]
        idle_secs: Option<u64>,
    },
    /// Check that the configured backend is reachable
    Check,
}

fn parse_template(raw: &str) -> Result<Template, String> {
    raw.parse().map_err(|e: reelbox_sandbox::SandboxError| e.to_string())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env(RUST_LOG)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match commands::handle_command(cli.command, cli.json).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exec_keeps_command_words() {
        let cli = Cli::try_parse_from([
            "reelbox", "exec", "sbx-1", "--timeout-ms", "500", "npx", "remotion", "render", "-y",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec {
                command,
                timeout_ms,
                background,
                ..
            } => {
                assert_eq!(command, vec!["npx", "remotion", "render", "-y"]);
                assert_eq!(timeout_ms, Some(500));
                assert!(!background);
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_template_argument() {
        let cli = Cli::try_parse_from(["reelbox", "create", "-p", "proj-1", "-t", "motion-canvas"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Create {
                template: Template::MotionCanvas,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["reelbox", "create", "-p", "x", "-t", "blender"]).is_err());
    }
}
