//! Chat-memory abstraction
//!
//! Sessions record their question/answer exchanges in a process-wide store
//! keyed by session id. The backend hides behind a trait so tests and
//! alternate deployments can swap it without touching the session layer.
//! Each session owns its own key exclusively; sharing the store across
//! sessions is safe because no two sessions mutate the same key.

use anyhow::Result;
use async_trait::async_trait;

use crate::core::llm::ChatMessage;

pub mod memory;

pub use memory::InMemoryChatMemory;

#[async_trait]
pub trait ChatMemory: Send + Sync {
    /// Append one message to a session's history.
    async fn append(&self, session_id: &str, message: ChatMessage) -> Result<()>;

    /// Load a session's history; empty if the session is unknown.
    async fn load(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    /// Drop a session's history.
    async fn clear(&self, session_id: &str) -> Result<()>;

    /// All session ids currently held.
    async fn list_sessions(&self) -> Result<Vec<String>>;

    /// Record one completed question/answer exchange.
    async fn record_exchange(&self, session_id: &str, question: &str, answer: &str) -> Result<()> {
        self.append(session_id, ChatMessage::user(question)).await?;
        self.append(session_id, ChatMessage::assistant(answer)).await
    }
}
