//! Application configuration.
//!
//! Settings are read from a TOML file (default `config/toolbridge.toml`),
//! then overlaid with environment variables. A missing file is not an error;
//! every field has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use toolbridge_agent::driver::DEFAULT_MAX_ITERATIONS;
use toolbridge_agent::{DEFAULT_SESSION_NAME, LoopConfig};
use toolbridge_web::WebConfig;
use toolbridge_web::auth::DEFAULT_TOKEN_TTL;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let web = WebConfig::default();
        Self {
            bind: web.bind_addr,
            port: web.port,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/toolbridge.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// HMAC secret for bearer tokens. Required by `serve` and `token`.
    pub secret: String,
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_ttl_secs: DEFAULT_TOKEN_TTL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Required by commands that call the model.
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Model for session titles. Empty means `model`.
    pub title_model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: toolbridge_agent::llm::client::OPENAI_BASE_URL.to_owned(),
            model: "gpt-4o-mini".to_owned(),
            title_model: String::new(),
            temperature: LoopConfig::default().temperature,
            max_tokens: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChatConfig {
    /// Replaces the built-in system prompt. An empty string disables it.
    pub system_prompt: Option<String>,
    pub max_iterations: u32,
    pub channel_capacity: usize,
    pub default_session_name: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            channel_capacity: 64,
            default_session_name: DEFAULT_SESSION_NAME.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

impl AppConfig {
    /// Load `path` (if it exists) and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&text).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay values from `var`, which looks up an environment variable.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("TOOLBRIDGE_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = var("TOOLBRIDGE_PORT") {
            self.server.port = v
                .parse()
                .with_context(|| format!("TOOLBRIDGE_PORT is not a port: {v}"))?;
        }
        if let Some(v) = var("TOOLBRIDGE_DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = var("TOOLBRIDGE_AUTH_SECRET") {
            self.auth.secret = v;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = var("TOOLBRIDGE_API_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = var("TOOLBRIDGE_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("TOOLBRIDGE_TITLE_MODEL") {
            self.llm.title_model = v;
        }
        if let Some(v) = var("TOOLBRIDGE_SYSTEM_PROMPT") {
            self.chat.system_prompt = Some(v);
        }
        if let Some(v) = var("TOOLBRIDGE_LOG") {
            self.log.level = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.chat.max_iterations == 0 {
            bail!("chat.max_iterations must be at least 1");
        }
        if self.chat.default_session_name.trim().is_empty() {
            bail!("chat.default_session_name must not be empty");
        }
        Ok(())
    }

    pub fn web(&self) -> WebConfig {
        WebConfig {
            bind_addr: self.server.bind.clone(),
            port: self.server.port,
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.token_ttl_secs)
    }
}
