//! CLI entry point for toolbridge.
//!
//! This binary provides the `toolbridge` command with subcommands for
//! serving the HTTP API, chatting in the terminal, issuing tokens and
//! checking the installation.

mod chat;
mod cli;
mod config;
mod helpers;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use toolbridge_store::SessionStore;
use toolbridge_web::WebServer;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::helpers::{build_conversations, init_tracing, open_database, token_signer};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Serve { bind, port } => {
            init_tracing(&config.log.level);
            cmd_serve(config, bind, port).await
        }
        Commands::Chat { session, user } => {
            // Logs would interleave with the streamed answer.
            init_tracing("warn");
            cmd_chat(config, user, session).await
        }
        Commands::Token { user } => {
            init_tracing("warn");
            cmd_token(&config, &user)
        }
        Commands::Status => {
            init_tracing("warn");
            cmd_status(&config, &cli.config).await
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(mut config: AppConfig, bind: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting toolbridge");

    let signer = token_signer(&config)?;
    let db = open_database(&config).await?;
    let conversations = build_conversations(&config, &db)?;

    let server = WebServer::new(config.web(), conversations, signer, db);
    info!(addr = %server.addr(), "serving");
    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("web server failed")
}

// ---------------------------------------------------------------------------
// Subcommand: chat
// ---------------------------------------------------------------------------

async fn cmd_chat(config: AppConfig, user: String, session: Option<String>) -> Result<()> {
    let db = open_database(&config).await?;
    let conversations = build_conversations(&config, &db)?;
    chat::run(conversations, SessionStore::new(db), user, session).await
}

// ---------------------------------------------------------------------------
// Subcommand: token
// ---------------------------------------------------------------------------

fn cmd_token(config: &AppConfig, user: &str) -> Result<()> {
    let signer = token_signer(config)?;
    let token = signer
        .issue(user)
        .with_context(|| format!("cannot issue a token for {user:?}"))?;
    println!("{token}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

async fn cmd_status(config: &AppConfig, config_path: &std::path::Path) -> Result<()> {
    println!();
    println!("  toolbridge Status");
    println!("  =================");
    println!();

    if config_path.exists() {
        println!("  Config file:      {}", config_path.display());
    } else {
        println!(
            "  Config file:      {} (missing, using defaults)",
            config_path.display()
        );
    }
    println!(
        "  Server:           {}:{}",
        config.server.bind, config.server.port
    );
    println!("  Model:            {} ({})", config.llm.model, config.llm.base_url);
    println!("  Max iterations:   {}", config.chat.max_iterations);

    let db_path = &config.database.path;
    if db_path.exists() {
        match open_database(config).await {
            Ok(db) => {
                let version = db.schema_version().await?;
                println!(
                    "  Database:         OK ({}, schema v{version})",
                    db_path.display()
                );
            }
            Err(e) => println!("  Database:         ERROR ({e:#})"),
        }
    } else {
        println!(
            "  Database:         NOT INITIALIZED ({}; created by `toolbridge serve`)",
            db_path.display()
        );
    }

    if config.llm.api_key.is_empty() {
        println!("  LLM API key:      NOT SET");
    } else {
        println!("  LLM API key:      CONFIGURED");
    }
    if config.auth.secret.is_empty() {
        println!("  Auth secret:      NOT SET");
    } else {
        println!("  Auth secret:      CONFIGURED");
    }

    println!();
    Ok(())
}
