//! Session-level orchestration around the streaming driver.
//!
//! A run loads the session's persisted history, drives the tool loop,
//! forwards every chunk to the caller and, once the loop is done, appends a
//! single assistant message carrying the accumulated text and sticky
//! fields. Runs on the same session are serialized.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::{debug, error, info, warn};

use toolbridge_store::{NewMessage, Session, SessionMessage, SessionStore, StoreResult};

use crate::driver::{CompletionOutcome, StreamChunk, ToolLoop};
use crate::error::{AgentError, Result};
use crate::llm::types::{ChatRequest, Message, Role};
use crate::tools::{AuthContext, StickyFields};

/// A message containing this marker cuts the model's memory: only messages
/// after it are replayed.
pub const RESET_MARKER: &str = "[[RESET]]";

/// Name a session carries until a title has been generated.
pub const DEFAULT_SESSION_NAME: &str = "New Chat";

/// Loaded history length that triggers title generation.
pub const TITLE_TRIGGER_HISTORY_LEN: usize = 3;

const MAX_TITLE_CHARS: usize = 60;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools \
    when they help answer the user, and keep answers short.";

const TITLE_PROMPT: &str = "Write a short title (at most six words) for the conversation \
    below. Reply with the title only, without quotes or punctuation at the end.";

// ---------------------------------------------------------------------------
// Persistence seam
// ---------------------------------------------------------------------------

/// The slice of session persistence a conversation run needs.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn session(&self, user_id: &str, session_id: &str) -> StoreResult<Session>;

    /// Messages in insertion order.
    async fn history(&self, user_id: &str, session_id: &str) -> StoreResult<Vec<SessionMessage>>;

    /// Append one message, returning its id.
    async fn append(&self, user_id: &str, session_id: &str, message: NewMessage)
    -> StoreResult<i64>;

    /// Delete messages of `session_id`; ids from other sessions are ignored.
    async fn delete_messages(
        &self,
        user_id: &str,
        session_id: &str,
        ids: &[i64],
    ) -> StoreResult<usize>;

    async fn rename(&self, user_id: &str, session_id: &str, name: &str) -> StoreResult<Session>;
}

#[async_trait]
impl ConversationStore for SessionStore {
    async fn session(&self, user_id: &str, session_id: &str) -> StoreResult<Session> {
        self.get_session(user_id, session_id).await
    }

    async fn history(&self, user_id: &str, session_id: &str) -> StoreResult<Vec<SessionMessage>> {
        self.get_messages(user_id, session_id).await
    }

    async fn append(
        &self,
        user_id: &str,
        session_id: &str,
        message: NewMessage,
    ) -> StoreResult<i64> {
        self.add_message(user_id, session_id, message).await
    }

    async fn delete_messages(
        &self,
        user_id: &str,
        session_id: &str,
        ids: &[i64],
    ) -> StoreResult<usize> {
        self.delete_session_messages(user_id, session_id, ids).await
    }

    async fn rename(&self, user_id: &str, session_id: &str, name: &str) -> StoreResult<Session> {
        self.rename_session(user_id, session_id, name).await
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Prepended to every transcript. Empty disables it.
    pub system_prompt: String,
    /// Model used for title generation. Empty means the client's default.
    pub title_model: String,
    /// Placeholder name; only sessions still carrying it get a title.
    pub default_session_name: String,
    /// Capacity of the chunk channels handed to callers.
    pub channel_capacity: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            title_model: String::new(),
            default_session_name: DEFAULT_SESSION_NAME.to_owned(),
            channel_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Entry point for chat turns on persisted sessions.
#[derive(Clone)]
pub struct ConversationService {
    driver: ToolLoop,
    store: Arc<dyn ConversationStore>,
    config: Arc<ConversationConfig>,
    locks: Arc<LockMap>,
}

impl ConversationService {
    pub fn new(
        driver: ToolLoop,
        store: Arc<dyn ConversationStore>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            driver,
            store,
            config: Arc::new(config),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn driver(&self) -> &ToolLoop {
        &self.driver
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Number of sessions with a run in flight or queued.
    pub fn active_sessions(&self) -> usize {
        self.locks.len()
    }

    /// Persist a user message and answer it.
    ///
    /// Errors before the run starts (unknown session, empty content) are
    /// returned directly; later failures arrive as a terminal
    /// [`StreamChunk::Error`].
    pub async fn send_message(
        &self,
        auth: AuthContext,
        session_id: &str,
        content: &str,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        if content.trim().is_empty() {
            return Err(AgentError::InvalidRequest {
                reason: "message content must not be empty".into(),
            });
        }

        let lock = self.lock_session(session_id).await;
        self.store
            .append(&auth.user_id, session_id, NewMessage::user(content))
            .await?;
        debug!(session_id, user_id = %auth.user_id, "user message persisted");

        Ok(self.spawn_run(auth, session_id.to_owned(), lock))
    }

    /// Delete `message_ids` from the session and answer again from what
    /// remains. Ids of other sessions are left untouched.
    pub async fn redo(
        &self,
        auth: AuthContext,
        session_id: &str,
        message_ids: &[i64],
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let lock = self.lock_session(session_id).await;
        let deleted = self
            .store
            .delete_messages(&auth.user_id, session_id, message_ids)
            .await?;
        info!(session_id, deleted, "messages removed for redo");

        Ok(self.spawn_run(auth, session_id.to_owned(), lock))
    }

    /// Answer the session's current history without adding anything to it.
    pub async fn run_stream(
        &self,
        auth: AuthContext,
        session_id: &str,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let lock = self.lock_session(session_id).await;
        self.store.session(&auth.user_id, session_id).await?;
        Ok(self.spawn_run(auth, session_id.to_owned(), lock))
    }

    /// One non-streaming, unpersisted run over `messages`.
    ///
    /// Every tool message must answer a call made by an earlier assistant
    /// message; otherwise the transcript is rejected before the model sees
    /// it.
    pub async fn complete_once(
        &self,
        auth: &AuthContext,
        mut messages: Vec<Message>,
    ) -> Result<CompletionOutcome> {
        check_tool_replies(&messages)?;
        let has_system = messages.first().is_some_and(|m| m.role == Role::System);
        if !has_system && !self.config.system_prompt.is_empty() {
            messages.insert(0, Message::system(&self.config.system_prompt));
        }
        self.driver.complete(messages, auth).await
    }

    // -- run -----------------------------------------------------------------

    fn spawn_run(
        &self,
        auth: AuthContext,
        session_id: String,
        lock: SessionLock,
    ) -> mpsc::Receiver<StreamChunk> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let service = self.clone();

        tokio::spawn(async move {
            match service.run(&auth, &session_id, &tx).await {
                Ok(()) => {}
                Err(AgentError::ChannelClosed) => {
                    debug!(session_id = %session_id, "subscriber went away, run stopped");
                }
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "conversation run failed");
                    let _ = tx
                        .send(StreamChunk::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
            drop(lock);
            drop(tx);
        });

        rx
    }

    async fn run(
        &self,
        auth: &AuthContext,
        session_id: &str,
        tx: &mpsc::Sender<StreamChunk>,
    ) -> Result<()> {
        let session = self.store.session(&auth.user_id, session_id).await?;
        let rows = self.store.history(&auth.user_id, session_id).await?;
        let messages = self.transcript(&rows);

        debug!(
            session_id,
            history_len = rows.len(),
            replayed = messages.len(),
            "starting conversation run"
        );

        let mut chunks =
            self.driver
                .spawn_stream(messages, auth.clone(), self.config.channel_capacity);
        let mut reply = String::new();
        let mut sticky = StickyFields::default();

        while let Some(chunk) = chunks.recv().await {
            if let StreamChunk::Done { .. } = chunk {
                let message_id = self
                    .store
                    .append(
                        &auth.user_id,
                        session_id,
                        NewMessage::assistant(reply.as_str())
                            .with_structured_content(sticky.structured_content.clone())
                            .with_widget_id(sticky.widget_id.clone()),
                    )
                    .await?;
                info!(session_id, message_id, "assistant message persisted");
                forward(
                    tx,
                    StreamChunk::Done {
                        message_id: Some(message_id),
                    },
                )
                .await?;

                if rows.len() == TITLE_TRIGGER_HISTORY_LEN
                    && session.name == self.config.default_session_name
                {
                    self.generate_title(auth, session_id, &rows, &reply).await;
                }
                return Ok(());
            }

            match &chunk {
                StreamChunk::Content { content } => reply.push_str(content),
                StreamChunk::Metadata {
                    meta,
                    structured_content,
                    widget_id,
                } => sticky.absorb_parts(
                    meta.as_ref(),
                    structured_content.as_ref(),
                    widget_id.as_deref(),
                ),
                _ => {}
            }

            let terminal = chunk.is_terminal();
            forward(tx, chunk).await?;
            if terminal {
                return Ok(());
            }
        }

        Err(AgentError::Internal(
            "chunk stream ended without a terminal chunk".into(),
        ))
    }

    /// Persisted rows to model messages, starting after the last reset
    /// marker. Tool rows are not replayed.
    fn transcript(&self, rows: &[SessionMessage]) -> Vec<Message> {
        let start = rows
            .iter()
            .rposition(|row| row.content.contains(RESET_MARKER))
            .map_or(0, |i| i + 1);

        let mut messages = Vec::with_capacity(rows.len() - start + 1);
        if !self.config.system_prompt.is_empty() {
            messages.push(Message::system(&self.config.system_prompt));
        }
        for row in &rows[start..] {
            match Role::parse(&row.role) {
                Some(Role::User) => messages.push(Message::user(&row.content)),
                Some(Role::Assistant) => messages.push(Message::assistant(&row.content)),
                Some(Role::System) => messages.push(Message::system(&row.content)),
                Some(Role::Tool) | None => {}
            }
        }
        messages
    }

    // -- title ---------------------------------------------------------------

    async fn generate_title(
        &self,
        auth: &AuthContext,
        session_id: &str,
        rows: &[SessionMessage],
        reply: &str,
    ) {
        let mut excerpt = String::new();
        for row in rows.iter().filter(|r| r.role == "user" || r.role == "assistant") {
            excerpt.push_str(&format!("{}: {}\n", row.role, row.content));
        }
        excerpt.push_str(&format!("assistant: {reply}\n"));

        let request = ChatRequest {
            model: self.config.title_model.clone(),
            messages: vec![Message::system(TITLE_PROMPT), Message::user(excerpt)],
            tools: Vec::new(),
            temperature: Some(0.3),
            max_tokens: Some(24),
        };

        let title = match self.driver.model().complete(&request).await {
            Ok(response) => clean_title(&response.content),
            Err(e) => {
                warn!(session_id, error = %e, "title generation failed");
                return;
            }
        };
        let Some(title) = title else {
            warn!(session_id, "title generation returned nothing usable");
            return;
        };

        match self.store.rename(&auth.user_id, session_id, &title).await {
            Ok(_) => info!(session_id, title = %title, "session titled"),
            Err(e) => warn!(session_id, error = %e, "failed to store generated title"),
        }
    }

    // -- locking -------------------------------------------------------------

    async fn lock_session(&self, session_id: &str) -> SessionLock {
        let mutex = self
            .locks
            .entry(session_id.to_owned())
            .or_default()
            .clone();
        SessionLock {
            guard: Some(mutex.lock_owned().await),
            locks: Arc::clone(&self.locks),
            session_id: session_id.to_owned(),
        }
    }
}

/// Held for the whole lifetime of a run. Removes the session's map entry on
/// release when nobody else is waiting for it.
struct SessionLock {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
    session_id: String,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.session_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Tool messages must carry the id of a call from an earlier assistant
/// message.
fn check_tool_replies(messages: &[Message]) -> Result<()> {
    let mut call_ids = HashSet::new();
    for (i, message) in messages.iter().enumerate() {
        match message.role {
            Role::Assistant => call_ids.extend(message.tool_calls.iter().map(|c| c.id.as_str())),
            Role::Tool => {
                let Some(id) = message.tool_call_id.as_deref() else {
                    return Err(AgentError::InvalidRequest {
                        reason: format!("tool message {i} has no tool_call_id"),
                    });
                };
                if !call_ids.contains(id) {
                    return Err(AgentError::InvalidRequest {
                        reason: format!(
                            "tool message {i} answers unknown tool call {id:?}"
                        ),
                    });
                }
            }
            Role::System | Role::User => {}
        }
    }
    Ok(())
}

async fn forward(tx: &mpsc::Sender<StreamChunk>, chunk: StreamChunk) -> Result<()> {
    tx.send(chunk).await.map_err(|_| AgentError::ChannelClosed)
}

/// First line, unquoted, trimmed and capped. `None` when nothing is left.
fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().find(|l| !l.trim().is_empty())?;
    let title = line
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if title.is_empty() {
        return None;
    }
    Some(title.chars().take(MAX_TITLE_CHARS).collect::<String>().trim_end().to_owned())
}
