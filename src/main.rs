use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use loom::config::Config;
use loom::llm::anthropic::AnthropicClient;
use loom::sandbox::remote::RemoteSandboxProvider;
use loom::server;
use loom::store::{DbHandle, MessageRole, MessageStore, MessageType, NewMessage};
use loom::workflow::Orchestrator;

#[derive(Parser)]
#[command(name = "loom")]
#[command(version, about = "Code-generation orchestration backend")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory containing loom.toml (defaults to the current directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on (overrides loom.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS, bind on all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Run one generation for a project from the command line
    Run {
        /// Existing project id; omit to create a fresh project
        #[arg(short, long)]
        project: Option<i64>,

        /// Name for a new project when no id is given
        #[arg(long, default_value = "cli")]
        project_name: String,

        /// The app request to generate from
        prompt: String,
    },
    /// Restart the sandbox behind a persisted fragment
    Restart {
        /// Fragment id to restart
        fragment_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let mut config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Serve { port, dev } => {
            if let Some(port) = port {
                config.port = port;
            }
            if dev {
                config.dev_mode = true;
            }
            server::start_server(config).await
        }
        Commands::Run {
            project,
            project_name,
            prompt,
        } => {
            let (orchestrator, db) = build_orchestrator(config)?;
            let project_id = match project {
                Some(id) => id,
                None => {
                    db.call(move |store| store.create_project(&project_name))
                        .await
                        .context("Failed to create project")?
                        .id
                }
            };
            let content = prompt.clone();
            db.call(move |store| {
                store.create_message(&NewMessage {
                    project_id,
                    role: MessageRole::User,
                    msg_type: MessageType::Result,
                    content,
                    fragment: None,
                })
            })
            .await
            .context("Failed to persist prompt")?;

            let outcome = orchestrator.run_generation(project_id, &prompt).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Commands::Restart { fragment_id } => {
            let (orchestrator, _db) = build_orchestrator(config)?;
            let url = orchestrator.run_restart(fragment_id, None).await?;
            println!("{}", url);
            Ok(())
        }
    }
}

fn build_orchestrator(config: Config) -> Result<(Orchestrator, DbHandle)> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    std::fs::create_dir_all(&config.state_dir).context("Failed to create state directory")?;

    let store = MessageStore::new(&config.db_path).context("Failed to initialize message store")?;
    let db = DbHandle::new(store);
    let model = Arc::new(AnthropicClient::new(&config.models));
    let sandbox = Arc::new(RemoteSandboxProvider::new(&config.sandbox));
    let orchestrator = Orchestrator::new(config, model, sandbox, db.clone());
    Ok((orchestrator, db))
}
