//! CLI argument definitions for toolbridge.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// toolbridge -- tool-calling chat orchestration.
#[derive(Parser)]
#[command(
    name = "toolbridge",
    version,
    about = "toolbridge -- tool-calling chat orchestration",
    long_about = "Runs an LLM tool-calling loop over persisted chat sessions and exposes \
                  the registered tools to AI hosts over MCP."
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(
        long,
        global = true,
        env = "TOOLBRIDGE_CONFIG",
        default_value = "config/toolbridge.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (MCP endpoint, session API, SSE chat).
    Serve {
        /// Address to bind the HTTP server to. Overrides the config file.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on. Overrides the config file.
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat in the terminal against the streaming orchestration.
    Chat {
        /// Resume an existing session instead of starting a new one.
        #[arg(long, short)]
        session: Option<String>,

        /// User the session belongs to.
        #[arg(long, short, default_value = "local")]
        user: String,
    },

    /// Print a signed bearer token for a user.
    Token {
        #[arg(long, short)]
        user: String,
    },

    /// Show the effective configuration and check the database.
    Status,
}
