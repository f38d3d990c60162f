//! Main web server setup and startup.
//!
//! [`WebServer`] composes the axum router, registers all routes, and starts
//! the HTTP listener.

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use toolbridge_agent::ConversationService;
use toolbridge_store::{Database, SessionStore};

use crate::WebConfig;
use crate::api;
use crate::auth::TokenSigner;
use crate::mcp;
use crate::state::AppState;

/// The toolbridge web server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server.
    ///
    /// # Arguments
    ///
    /// * `config` - Bind address and port configuration.
    /// * `conversations` - Chat orchestration, which also owns the tool registry.
    /// * `signer` - Verifies the bearer tokens of incoming requests.
    /// * `db` - The database handle.
    pub fn new(
        config: WebConfig,
        conversations: ConversationService,
        signer: TokenSigner,
        db: Database,
    ) -> Self {
        let state = Arc::new(AppState {
            conversations,
            sessions: SessionStore::new(db.clone()),
            signer,
            config: config.clone(),
            db,
        });
        Self { config, state }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Build the axum router with all routes registered.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(HeaderValue::from_static("*"))
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers(Any);

        Router::new()
            .route("/api/health", get(api::health))
            .route("/api/tools", get(api::tools))
            .route("/api/chat", post(api::chat))
            // Session management.
            .route(
                "/api/sessions",
                get(api::list_sessions).post(api::create_session),
            )
            .route(
                "/api/sessions/{id}",
                get(api::get_session)
                    .patch(api::rename_session)
                    .delete(api::delete_session),
            )
            .route(
                "/api/sessions/{id}/messages",
                get(api::get_session_messages).post(api::send_message),
            )
            .route("/api/sessions/{id}/redo", post(api::redo))
            .route("/api/messages", delete(api::delete_messages))
            // MCP (Model Context Protocol) endpoint.
            .route("/mcp", post(mcp::handle_mcp_request))
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve until shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until ctrl-c.
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = self.router();
        tracing::info!(addr = %listener.local_addr()?, tools = self.state.registry().len(), "starting web server");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("web server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
