//! HTTP transport for toolbridge.
//!
//! This crate exposes the orchestration runtime over axum:
//!
//! - An MCP (Model Context Protocol) endpoint through which an AI host lists
//!   and calls the registered tools.
//! - A REST API for sessions and messages.
//! - Chat turns answered as Server-Sent Events, one event per stream chunk.
//!
//! Every route except the health check requires a bearer token issued by
//! [`TokenSigner`].

pub mod api;
pub mod auth;
pub mod error;
pub mod mcp;
pub mod server;
pub mod state;

pub use auth::{AuthError, AuthUser, TokenSigner};
pub use error::ApiError;
pub use mcp::McpServer;
pub use server::WebServer;
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 3000,
        }
    }
}
