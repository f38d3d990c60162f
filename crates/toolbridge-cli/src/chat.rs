//! Terminal chat sandbox.
//!
//! Drives the same streaming orchestration as the web API: each line typed
//! is persisted as a user message and the answer is printed chunk by chunk.
//!
//! Slash commands:
//!
//! - `/history` -- print the stored transcript.
//! - `/redo` -- drop the last answer and ask again.
//! - `/reset` -- start a fresh context in the same session.
//! - `/quit` or `/exit` -- leave.

use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use toolbridge_agent::{AuthContext, ConversationService, RESET_MARKER, StreamChunk};
use toolbridge_store::{NewMessage, Session, SessionStore};

/// Longest tool result echoed to the terminal.
const MAX_RESULT_PREVIEW: usize = 200;

pub async fn run(
    conversations: ConversationService,
    sessions: SessionStore,
    user_id: String,
    session_id: Option<String>,
) -> Result<()> {
    let session = open_session(&conversations, &sessions, &user_id, session_id).await?;
    let auth = AuthContext::new("local", &user_id);
    info!(session_id = %session.id, user_id = %user_id, "chat session opened");

    println!();
    println!("  toolbridge v{}", env!("CARGO_PKG_VERSION"));
    println!("  Session: {} ({})", session.name, session.id);
    println!("  Type a message, /help for commands, /quit to exit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();

    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        let input = line.trim();

        match input {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/history" => print_history(&sessions, &user_id, &session.id).await?,
            "/reset" => {
                sessions
                    .add_message(&user_id, &session.id, NewMessage::assistant(RESET_MARKER))
                    .await?;
                println!("  (context cleared)");
            }
            "/redo" => {
                let history = sessions.get_messages(&user_id, &session.id).await?;
                let last_answer: Vec<i64> = history
                    .last()
                    .filter(|m| m.role == "assistant" && !m.content.contains(RESET_MARKER))
                    .map(|m| vec![m.id])
                    .unwrap_or_default();
                if last_answer.is_empty() {
                    println!("  (nothing to redo)");
                } else {
                    let rx = conversations
                        .redo(auth.clone(), &session.id, &last_answer)
                        .await?;
                    render(rx).await;
                }
            }
            text if text.starts_with('/') => println!("  unknown command: {text}"),
            text => match conversations.send_message(auth.clone(), &session.id, text).await {
                Ok(rx) => render(rx).await,
                Err(e) => eprintln!("  error: {e}"),
            },
        }

        prompt();
    }

    println!();
    Ok(())
}

async fn open_session(
    conversations: &ConversationService,
    sessions: &SessionStore,
    user_id: &str,
    session_id: Option<String>,
) -> Result<Session> {
    match session_id {
        Some(id) => sessions
            .get_session(user_id, &id)
            .await
            .with_context(|| format!("session {id} not found for user {user_id}")),
        None => {
            let name = &conversations.config().default_session_name;
            Ok(sessions.create_session(user_id, name).await?)
        }
    }
}

/// Print chunks as they arrive until the run ends.
async fn render(mut rx: mpsc::Receiver<StreamChunk>) {
    let mut stdout = std::io::stdout();
    let mut mid_line = false;

    while let Some(chunk) = rx.recv().await {
        match chunk {
            StreamChunk::Content { content } => {
                print!("{content}");
                let _ = stdout.flush();
                mid_line = !content.ends_with('\n');
            }
            StreamChunk::ToolCall { tool_calls } => {
                end_line(&mut mid_line);
                for call in tool_calls {
                    println!("  -> {}({})", call.name, call.arguments);
                }
            }
            StreamChunk::ToolResult { name, result, .. } => {
                println!("  <- {name}: {}", preview(&result));
            }
            StreamChunk::Metadata { widget_id, .. } => {
                end_line(&mut mid_line);
                if let Some(widget) = widget_id {
                    println!("  [widget: {widget}]");
                }
            }
            StreamChunk::Done { .. } => {
                end_line(&mut mid_line);
            }
            StreamChunk::Error { message } => {
                end_line(&mut mid_line);
                eprintln!("  error: {message}");
            }
        }
    }
}

async fn print_history(sessions: &SessionStore, user_id: &str, session_id: &str) -> Result<()> {
    let history = sessions.get_messages(user_id, session_id).await?;
    if history.is_empty() {
        println!("  (empty)");
    }
    for message in history {
        println!("  [{}] {}: {}", message.id, message.role, preview(&message.content));
    }
    Ok(())
}

fn print_help() {
    println!();
    println!("  /history   show the stored transcript");
    println!("  /redo      drop the last answer and ask again");
    println!("  /reset     start a fresh context in this session");
    println!("  /quit      exit");
    println!();
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn end_line(mid_line: &mut bool) {
    if *mid_line {
        println!();
        *mid_line = false;
    }
}

fn preview(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= MAX_RESULT_PREVIEW {
        single_line
    } else {
        let cut: String = single_line.chars().take(MAX_RESULT_PREVIEW).collect();
        format!("{cut}...")
    }
}
