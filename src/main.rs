//! Aegis - Security Checkpoint for AI Agents
//!
//! Scores incoming content for prompt injection, redacts sensitive data in
//! outgoing content, and tracks per-session taint.

use aegis::{
    bootstrap::{build_checkpoint, run_server, run_stdio},
    config::AegisConfig,
    policy::{FilePolicySource, PolicyStore},
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "aegis")]
#[command(version)]
#[command(about = "Security checkpoint for AI agents")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "AEGIS_CONFIG")]
    config: Option<PathBuf>,

    /// Policy document path (overrides the configuration file)
    #[arg(short, long, env = "AEGIS_POLICY")]
    policy: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the checkpoint over HTTP
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Serve the checkpoint as JSON lines on stdin/stdout
    Stdio,

    /// Analyze incoming content (reads stdin when no content is given)
    Analyze {
        content: Option<String>,

        #[arg(short, long)]
        session: Option<String>,
    },

    /// Scan and redact outgoing content (reads stdin when no data is given)
    ScanOutput {
        data: Option<String>,

        #[arg(short, long)]
        session: Option<String>,
    },

    /// Reset a session to clean
    Reset {
        session: String,

        #[arg(long)]
        actor: Option<String>,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Show policy and event totals
    Status,

    /// Validate the policy document
    CheckPolicy,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries results and the stdio protocol
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("aegis={},tower_http=debug", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let mut config = match &cli.config {
        Some(path) => AegisConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let default_path = AegisConfig::default_path();
            if default_path.exists() {
                AegisConfig::load(&default_path)?
            } else {
                AegisConfig::default()
            }
        }
    };
    if let Some(policy) = cli.policy {
        config.policy.path = policy;
    }

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            run_server(config, &host, port).await?;
        }
        Commands::Stdio => {
            run_stdio(config).await?;
        }
        Commands::Analyze { content, session } => {
            let content = content_or_stdin(content)?;
            let (checkpoint, _log) = build_checkpoint(&config).await?;
            let resp = checkpoint
                .analyze_incoming_content(&content, session.as_deref())
                .await;
            print_json(&resp)?;
        }
        Commands::ScanOutput { data, session } => {
            let data = content_or_stdin(data)?;
            let (checkpoint, _log) = build_checkpoint(&config).await?;
            let resp = checkpoint.scan_output_data(&data, session.as_deref()).await;
            print_json(&resp)?;
        }
        Commands::Reset {
            session,
            actor,
            reason,
        } => {
            let (checkpoint, _log) = build_checkpoint(&config).await?;
            let resp = checkpoint
                .reset_session(Some(&session), actor.as_deref(), reason.as_deref())
                .await;
            print_json(&resp)?;
        }
        Commands::Status => {
            let (checkpoint, _log) = build_checkpoint(&config).await?;
            print_json(&checkpoint.get_status().await)?;
        }
        Commands::CheckPolicy => {
            check_policy(&config).await?;
        }
        Commands::Config { default } => {
            let config = if default {
                AegisConfig::default()
            } else {
                config
            };
            println!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

async fn check_policy(config: &AegisConfig) -> Result<()> {
    let store = PolicyStore::new(std::sync::Arc::new(FilePolicySource::new(
        config.policy.path.clone(),
    )));
    let policy = store
        .load()
        .await
        .with_context(|| format!("Invalid policy {}", config.policy.path.display()))?;

    println!("Policy OK: {}", config.policy.path.display());
    println!("  digest:            {}", policy.digest);
    println!("  injection scanner: {}", policy.enabled_injection_scanner);
    println!("  threshold:         {}", policy.injection_threshold);
    println!("  entities:          {}", policy.pii_entities.join(", "));
    println!("  custom patterns:   {}", policy.custom_patterns.len());
    Ok(())
}

fn content_or_stdin(content: Option<String>) -> Result<String> {
    match content {
        Some(c) => Ok(c),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
