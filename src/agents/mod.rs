//! Agents and the conversations between them
//!
//! An `Agent` is a role-bound wrapper around the completion capability:
//! a name, an instruction payload, a completion configuration, an optional
//! capability dispatch table and a termination policy. Agents are built per
//! conversation by the `AgentSet` factory and discarded with the
//! orchestrator invocation that created them; transcripts live in the
//! `Conversation`/`GroupChat`, never in the Agent.

pub mod conversation;
pub mod factory;
pub mod group;

use std::sync::Arc;

use crate::capability::CapabilityRegistry;
use crate::core::llm::{ChatCompletion, ChatMessage, CompletionConfig};
use crate::error::Result;

pub use conversation::{ChatOutcome, ChatState, Conversation};
pub use factory::{AgentSet, SelectorMode, SessionProfile};
pub use group::{GroupChat, GroupOutcome};

/// Protocol constant: a reply containing this substring ends the
/// conversation. Matching is the conversation engine's concern; callers
/// read `is_terminal` / `final_answer` instead of re-deriving it.
pub const TERMINATE: &str = "TERMINATE";

/// A configured conversational role.
pub struct Agent {
    name: String,
    system_message: String,
    config: CompletionConfig,
    client: Arc<dyn ChatCompletion>,
    /// Dispatch table for function calls this agent executes on behalf of
    /// its peers. Only driving/executor agents carry one.
    registry: Option<CapabilityRegistry>,
    /// Automatic replies this agent may send before the conversation is
    /// forced terminal. Zero makes a one-shot "ask and read" initiator.
    max_auto_replies: usize,
    /// What this agent says when asked to speak without an LLM behind it.
    default_auto_reply: String,
    /// Whether this agent answers through the completion endpoint at all.
    /// Proxy agents do not; they reply with `default_auto_reply`.
    has_model: bool,
}

impl Agent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_message(&self) -> &str {
        &self.system_message
    }

    pub fn registry(&self) -> Option<&CapabilityRegistry> {
        self.registry.as_ref()
    }

    pub fn max_auto_replies(&self) -> usize {
        self.max_auto_replies
    }

    pub fn default_auto_reply(&self) -> &str {
        &self.default_auto_reply
    }

    pub fn has_model(&self) -> bool {
        self.has_model
    }

    /// One completion turn: the transcript as this agent sees it goes to
    /// the model, the reply text comes back. Single attempt; retry policy
    /// belongs to the orchestrator.
    pub async fn reply(&self, transcript: &[ChatMessage]) -> Result<String> {
        if !self.has_model {
            return Ok(self.default_auto_reply.clone());
        }

        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(ChatMessage::system(self.system_message.clone()));
        messages.extend_from_slice(transcript);

        let completion = self.client.complete(&messages, &self.config).await?;
        tracing::debug!(
            "[{}] replied {} chars (cost {:.6})",
            self.name,
            completion.text.len(),
            completion.cost
        );
        Ok(completion.text)
    }
}

/// Builder used by the factory; kept private to the module so every agent
/// goes through `AgentSet`.
pub(crate) struct AgentSpec {
    pub name: String,
    pub system_message: String,
    pub registry: Option<CapabilityRegistry>,
    pub max_auto_replies: usize,
    pub default_auto_reply: String,
    pub has_model: bool,
}

impl AgentSpec {
    pub(crate) fn assistant(name: &str, system_message: String) -> Self {
        Self {
            name: name.to_string(),
            system_message,
            registry: None,
            max_auto_replies: 1,
            default_auto_reply: TERMINATE.to_string(),
            has_model: true,
        }
    }

    pub(crate) fn proxy(name: &str) -> Self {
        Self {
            name: name.to_string(),
            system_message: String::new(),
            registry: None,
            max_auto_replies: 0,
            default_auto_reply: TERMINATE.to_string(),
            has_model: false,
        }
    }

    pub(crate) fn build(
        self,
        client: Arc<dyn ChatCompletion>,
        config: CompletionConfig,
    ) -> Result<Agent> {
        Ok(Agent {
            name: self.name,
            system_message: self.system_message,
            config,
            client,
            registry: self.registry,
            max_auto_replies: self.max_auto_replies,
            default_auto_reply: self.default_auto_reply,
            has_model: self.has_model,
        })
    }
}

/// True when a reply body carries the termination sentinel anywhere.
pub(crate) fn contains_sentinel(text: &str) -> bool {
    text.contains(TERMINATE)
}

/// Strip the sentinel and surrounding whitespace from a final answer.
pub fn strip_sentinel(text: &str) -> String {
    text.replace(TERMINATE, "").trim().to_string()
}
