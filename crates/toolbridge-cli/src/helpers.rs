//! Shared helpers for the CLI subcommands: tracing setup and wiring the
//! runtime from an [`AppConfig`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;
use tracing_subscriber::EnvFilter;

use toolbridge_agent::{
    ConversationConfig, ConversationService, LlmClient, LlmClientConfig, LoopConfig, ToolLoop,
};
use toolbridge_store::{Database, SessionStore, TodoStore};
use toolbridge_tools::default_registry;
use toolbridge_web::TokenSigner;

use crate::config::AppConfig;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the global tracing subscriber. `RUST_LOG` wins over
/// `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Runtime wiring
// ---------------------------------------------------------------------------

/// Open the configured database and run migrations. `Database::open`
/// creates missing parent directories.
pub async fn open_database(config: &AppConfig) -> Result<Database> {
    let path = config.database.path.clone();
    let db = Database::open_and_migrate(path.clone())
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    info!(path = %path.display(), "store initialized");
    Ok(db)
}

/// Build the conversation service: LLM client, tool registry, driver.
pub fn build_conversations(config: &AppConfig, db: &Database) -> Result<ConversationService> {
    let llm = &config.llm;
    if llm.api_key.is_empty() {
        bail!("no LLM API key configured (set OPENAI_API_KEY or llm.api_key)");
    }

    let client = LlmClient::new(
        LlmClientConfig::openai_compatible(&llm.api_key, &llm.model, &llm.base_url)
            .with_max_tokens(llm.max_tokens)
            .with_timeout(Duration::from_secs(llm.timeout_secs)),
    )
    .context("failed to create LLM client")?;

    let registry = default_registry(TodoStore::new(db.clone()))
        .context("failed to build tool registry")?;

    let driver = ToolLoop::new(
        Arc::new(client),
        Arc::new(registry),
        LoopConfig {
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            max_iterations: config.chat.max_iterations,
        },
    );

    let defaults = ConversationConfig::default();
    let conversation = ConversationConfig {
        system_prompt: config
            .chat
            .system_prompt
            .clone()
            .unwrap_or(defaults.system_prompt),
        title_model: llm.title_model.clone(),
        default_session_name: config.chat.default_session_name.clone(),
        channel_capacity: config.chat.channel_capacity,
    };

    info!(
        model = %llm.model,
        base_url = %llm.base_url,
        max_iterations = config.chat.max_iterations,
        "conversation service ready"
    );
    Ok(ConversationService::new(
        driver,
        Arc::new(SessionStore::new(db.clone())),
        conversation,
    ))
}

/// The token signer, which needs a configured secret.
pub fn token_signer(config: &AppConfig) -> Result<TokenSigner> {
    if config.auth.secret.is_empty() {
        bail!("no auth secret configured (set TOOLBRIDGE_AUTH_SECRET or auth.secret)");
    }
    Ok(TokenSigner::new(
        config.auth.secret.as_bytes(),
        config.token_ttl(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_requires_secret() {
        let mut config = AppConfig::default();
        assert!(token_signer(&config).is_err());

        config.auth.secret = "s3cret".into();
        let signer = token_signer(&config).unwrap();
        let token = signer.issue("alice").unwrap();
        assert_eq!(signer.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn conversations_require_api_key() {
        let db = Database::open_in_memory().unwrap();
        let Err(err) = build_conversations(&AppConfig::default(), &db) else {
            panic!("conversations built without an API key");
        };
        assert!(err.to_string().contains("API key"));
    }

    #[tokio::test]
    async fn database_directory_is_created() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.database.path = dir.path().join("nested/dir/tb.db");

        let db = open_database(&config).await.unwrap();
        assert_eq!(
            db.schema_version().await.unwrap(),
            toolbridge_store::migration::LATEST_VERSION
        );
    }
}
