//! In-memory chat store
//!
//! HashMap behind an async RwLock; contents die with the process. This is
//! the default backend for the CLI and for tests.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::ChatMemory;
use crate::core::llm::ChatMessage;

pub struct InMemoryChatMemory {
    sessions: Arc<RwLock<HashMap<String, Vec<ChatMessage>>>>,
}

impl InMemoryChatMemory {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryChatMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatMemory for InMemoryChatMemory {
    async fn append(&self, session_id: &str, message: ChatMessage) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.entry(session_id.to_string()).or_default().push(message);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let sessions = self.sessions.read().await;
        let history = sessions.get(session_id).cloned().unwrap_or_default();
        tracing::debug!(
            "[InMemoryChatMemory] loaded {} messages for session '{}'",
            history.len(),
            session_id
        );
        Ok(history)
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        tracing::debug!("[InMemoryChatMemory] cleared session '{}'", session_id);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.keys().cloned().collect())
    }
}
