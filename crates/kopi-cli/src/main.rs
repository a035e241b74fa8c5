//! CLI entry point for kopi.
//!
//! This binary provides the `kopi` command with subcommands for chatting
//! with the assistant, asking one-shot questions, loading outlet data, and
//! checking backend status.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kopi_agent::{Controller, KopiConfig, LlmClient, LlmClientConfig, Role, TurnStatus};
use kopi_store::{OutletStore, ProductIndex};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// kopi — a coffee-chain assistant.
#[derive(Parser)]
#[command(
    name = "kopi",
    version,
    about = "kopi — conversational assistant for products, outlets, and sums",
    long_about = "A conversational assistant that answers questions about drinkware \
                  products, outlet locations and hours, and simple arithmetic."
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session.
    Chat,

    /// Ask a single question and print the reply.
    Ask {
        /// The question to ask.
        question: String,
    },

    /// Load outlet records from a JSON file into the outlet database.
    LoadOutlets {
        /// JSON file containing an array of outlet records.
        file: PathBuf,
    },

    /// Show backend readiness.
    Status,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; ignore a missing file.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing("warn");

    let config = KopiConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Chat => cmd_chat(config).await,
        Commands::Ask { question } => cmd_ask(config, &question).await,
        Commands::LoadOutlets { file } => cmd_load_outlets(config, &file).await,
        Commands::Status => cmd_status(config).await,
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Wire up the reasoning client, backends, and controller from config.
async fn build_controller(config: KopiConfig) -> Result<Controller> {
    let llm_config = match config.reasoning.provider.as_str() {
        "openai" if !config.reasoning.base_url.is_empty() => LlmClientConfig::openai_compatible(
            config.reasoning.api_key.clone(),
            config.reasoning.model.clone(),
            config.reasoning.base_url.clone(),
        ),
        "openai" => LlmClientConfig::openai(
            config.reasoning.api_key.clone(),
            config.reasoning.model.clone(),
        ),
        _ => LlmClientConfig::gemini(
            config.reasoning.api_key.clone(),
            config.reasoning.model.clone(),
        ),
    };
    let llm = LlmClient::new(llm_config)
        .context("reasoning client setup failed (is GEMINI_API_KEY set?)")?;

    let products = ProductIndex::new();
    if config.data.products_json.exists() {
        let count = products
            .load_from_json(&config.data.products_json)
            .with_context(|| {
                format!(
                    "failed to load products from {}",
                    config.data.products_json.display()
                )
            })?;
        info!(count, "product catalogue loaded");
    }

    if let Some(parent) = config.data.outlets_db.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("failed to create data directory")?;
    }
    let outlets = OutletStore::open(&config.data.outlets_db).with_context(|| {
        format!(
            "failed to open outlet database at {}",
            config.data.outlets_db.display()
        )
    })?;

    Ok(Controller::new(
        config,
        Arc::new(llm),
        Arc::new(products),
        Arc::new(outlets),
    ))
}

// ---------------------------------------------------------------------------
// Subcommand: chat
// ---------------------------------------------------------------------------

async fn cmd_chat(config: KopiConfig) -> Result<()> {
    let agent = build_controller(config).await?;
    let session_id = "local";

    let readiness = agent.readiness();
    println!();
    println!("  kopi v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "  products: {}   outlets: {}",
        if readiness.products_loaded { "ready" } else { "not loaded" },
        if readiness.outlets_loaded { "ready" } else { "not loaded" },
    );
    println!("  Ask me about products, outlets, or sums. 'help' for commands.");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("you> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        match trimmed {
            "quit" | "exit" => break,
            "help" => {
                println!();
                println!("  Commands:");
                println!("    clear         - Forget this conversation");
                println!("    history       - Show the conversation so far");
                println!("    status        - Show backend readiness");
                println!("    help          - Show this help");
                println!("    quit / exit   - Leave");
                println!();
                continue;
            }
            "clear" => {
                agent.clear_session(session_id).await?;
                println!("  (conversation cleared)");
                continue;
            }
            "history" => {
                let history = agent.session_history(session_id).await?;
                if history.is_empty() {
                    println!("  (no conversation yet)");
                }
                for entry in history {
                    let who = match entry.role {
                        Role::User => "you",
                        Role::Agent => "kopi",
                    };
                    println!("  {who}: {}", entry.text);
                }
                continue;
            }
            "status" => {
                let readiness = agent.readiness();
                println!("  products: {}", readiness.products_loaded);
                println!("  outlets:  {}", readiness.outlets_loaded);
                continue;
            }
            _ => {}
        }

        let reply = agent.handle_turn(session_id, trimmed).await;
        println!("kopi> {}", reply.text);
    }

    println!("bye!");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: ask
// ---------------------------------------------------------------------------

async fn cmd_ask(config: KopiConfig, question: &str) -> Result<()> {
    let agent = build_controller(config).await?;

    let reply = agent.handle_turn("oneshot", question).await;
    println!("{}", reply.text);

    if reply.status == TurnStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: load-outlets
// ---------------------------------------------------------------------------

async fn cmd_load_outlets(config: KopiConfig, file: &std::path::Path) -> Result<()> {
    if let Some(parent) = config.data.outlets_db.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("failed to create data directory")?;
    }

    let store = OutletStore::open(&config.data.outlets_db)?;
    let count = store
        .load_from_json(file)
        .await
        .with_context(|| format!("failed to load outlets from {}", file.display()))?;

    println!(
        "loaded {count} outlets into {}",
        config.data.outlets_db.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

async fn cmd_status(config: KopiConfig) -> Result<()> {
    let agent = build_controller(config).await?;
    let readiness = agent.readiness();

    println!("products: {}", if readiness.products_loaded { "ready" } else { "not loaded" });
    println!("outlets:  {}", if readiness.outlets_loaded { "ready" } else { "not loaded" });
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
