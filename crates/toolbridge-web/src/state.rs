//! Shared application state for the web server.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all request
//! handlers. The tool registry is reached through the conversation
//! service's driver so the MCP endpoint and the chat loop always expose the
//! same tools.

use std::sync::Arc;

use toolbridge_agent::{ConversationService, ToolRegistry};
use toolbridge_store::{Database, SessionStore};

use crate::WebConfig;
use crate::auth::TokenSigner;

/// Shared state accessible from every axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Chat orchestration over persisted sessions.
    pub conversations: ConversationService,

    /// Session store for the REST API.
    pub sessions: SessionStore,

    /// Issues and verifies bearer tokens.
    pub signer: TokenSigner,

    /// Web server configuration.
    pub config: WebConfig,

    /// Database handle, used by the health check.
    pub db: Database,
}

impl AppState {
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.conversations.driver().registry()
    }
}
