//! Two-party conversation engine
//!
//! An initiator opens with a question; a responder answers until one side
//! emits the termination sentinel or the initiator's auto-reply budget runs
//! out. Function-call replies are dispatched inline through the capability
//! registry and do not consume a speaking turn: the function output goes
//! back into the transcript and the responder speaks again, so a single
//! turn may chain query → result → revised query before settling on text.

use crate::agents::{contains_sentinel, strip_sentinel, Agent};
use crate::capability::{parse_invocation, CapabilityRegistry};
use crate::core::llm::ChatMessage;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    /// The responder spoke and nobody terminated; the caller may read the
    /// last reply or resume with another message.
    AwaitingReply,
    /// A side emitted the sentinel.
    Terminated,
}

/// Finished transcript plus how the conversation ended.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    transcript: Vec<ChatMessage>,
    state: ChatState,
}

impl ChatOutcome {
    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state == ChatState::Terminated
    }

    /// The most recent responder reply, verbatim.
    pub fn last_reply(&self) -> &str {
        self.transcript
            .iter()
            .rev()
            .find(|m| m.role == "assistant")
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// The most recent responder reply with the sentinel stripped.
    pub fn final_answer(&self) -> String {
        strip_sentinel(self.last_reply())
    }

    /// Every function-role message the conversation produced, in order.
    pub fn function_results(&self) -> Vec<&ChatMessage> {
        self.transcript
            .iter()
            .filter(|m| m.role == "function")
            .collect()
    }
}

/// One initiator/responder pairing. The registry used for dispatch is
/// whichever side carries one; conversations where neither side does treat
/// every reply as plain text.
pub struct Conversation<'a> {
    initiator: &'a Agent,
    responder: &'a Agent,
    max_function_hops: usize,
}

impl<'a> Conversation<'a> {
    pub fn new(initiator: &'a Agent, responder: &'a Agent, max_function_hops: usize) -> Self {
        Self {
            initiator,
            responder,
            max_function_hops,
        }
    }

    fn registry(&self) -> Option<&CapabilityRegistry> {
        self.initiator.registry().or_else(|| self.responder.registry())
    }

    /// Run the conversation from an opening message to completion.
    ///
    /// Completion failures propagate; retrying a whole conversation is the
    /// orchestrator's decision, not the engine's.
    pub async fn run(&self, opening: impl Into<String>) -> Result<ChatOutcome> {
        let mut transcript = vec![ChatMessage::user(opening.into())];
        let mut auto_replies_left = self.initiator.max_auto_replies();

        loop {
            let reply = self.responder_turn(&mut transcript).await?;
            let terminal = contains_sentinel(&reply);
            transcript.push(ChatMessage::assistant(reply));
            if terminal {
                return Ok(ChatOutcome {
                    transcript,
                    state: ChatState::Terminated,
                });
            }

            if auto_replies_left == 0 {
                return Ok(ChatOutcome {
                    transcript,
                    state: ChatState::AwaitingReply,
                });
            }
            auto_replies_left -= 1;

            let auto = self.initiator_reply(&transcript).await?;
            let terminal = contains_sentinel(&auto);
            transcript.push(ChatMessage::user(auto));
            if terminal {
                return Ok(ChatOutcome {
                    transcript,
                    state: ChatState::Terminated,
                });
            }
        }
    }

    /// One responder speaking turn, function hops included. Returns the
    /// textual reply that settles the turn.
    async fn responder_turn(&self, transcript: &mut Vec<ChatMessage>) -> Result<String> {
        let mut hops = 0;
        loop {
            let text = self.responder.reply(transcript).await?;

            let (registry, call) = match (self.registry(), parse_invocation(&text)) {
                (Some(registry), Some(call)) if hops < self.max_function_hops => (registry, call),
                _ => return Ok(text),
            };

            tracing::info!(
                "[{}] invoking '{}' (hop {})",
                self.responder.name(),
                call.function,
                hops + 1
            );
            transcript.push(ChatMessage::assistant(text));

            // Collaborator failures go back into the transcript as function
            // output so the responder can correct itself on the next hop.
            let output = match registry.dispatch(&call).await {
                Ok(output) => output,
                Err(err @ (Error::Capability { .. } | Error::Parse(_))) => {
                    tracing::warn!("[{}] '{}' failed: {err}", self.responder.name(), call.function);
                    err.to_string()
                }
                Err(err) => return Err(err),
            };
            transcript.push(ChatMessage::function(call.function, output));
            hops += 1;
        }
    }

    /// The initiator's automatic reply. Proxy initiators answer with their
    /// fixed default; model-backed initiators see the transcript with the
    /// roles swapped to their own perspective.
    async fn initiator_reply(&self, transcript: &[ChatMessage]) -> Result<String> {
        if !self.initiator.has_model() {
            return Ok(self.initiator.default_auto_reply().to_string());
        }

        let swapped: Vec<ChatMessage> = transcript
            .iter()
            .map(|m| match m.role.as_str() {
                "user" => ChatMessage::assistant(m.content.clone()),
                "assistant" => ChatMessage::user(m.content.clone()),
                _ => m.clone(),
            })
            .collect();
        self.initiator.reply(&swapped).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Mutex;

    use super::*;
    use crate::agents::AgentSpec;
    use crate::capability::{Capability, CapabilitySpec, ParamSpec};
    use crate::core::llm::{ChatCompletion, Completion, CompletionConfig};
    use crate::error::CompletionError;

    struct ScriptedClient {
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedClient {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedClient {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _config: &CompletionConfig,
        ) -> std::result::Result<Completion, CompletionError> {
            let text = self
                .replies
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| CompletionError::Malformed("script exhausted".to_string()))?;
            Ok(Completion { text, cost: 0.0 })
        }
    }

    struct CountCapability;

    #[async_trait]
    impl Capability for CountCapability {
        fn spec(&self) -> CapabilitySpec {
            CapabilitySpec {
                name: "count_rows".to_string(),
                description: "Count rows".to_string(),
                parameters: vec![ParamSpec::required("table", "string", "Table name")],
            }
        }

        fn validate(&self, args: &Value) -> Result<()> {
            if args.get("table").map_or(false, Value::is_string) {
                Ok(())
            } else {
                Err(Error::capability("count_rows", "'table' must be a string"))
            }
        }

        async fn execute(&self, _args: Value) -> Result<String> {
            Ok("exitcode: 0\n42 rows".to_string())
        }
    }

    fn config() -> CompletionConfig {
        CompletionConfig {
            model: "gpt-4".to_string(),
            temperature: 0.0,
            max_tokens: 256,
            timeout: Duration::from_secs(5),
        }
    }

    fn assistant(client: Arc<dyn ChatCompletion>, name: &str) -> Agent {
        AgentSpec::assistant(name, format!("You are {name}."))
            .build(client, config())
            .unwrap()
    }

    fn proxy_with_registry(client: Arc<dyn ChatCompletion>) -> Agent {
        let mut spec = AgentSpec::proxy("executor");
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(CountCapability)).unwrap();
        spec.registry = Some(registry);
        spec.build(client, config()).unwrap()
    }

    #[tokio::test]
    async fn sentinel_ends_the_conversation() {
        let client = ScriptedClient::new(&["Nothing else to add. TERMINATE"]);
        let initiator = AgentSpec::proxy("asker")
            .build(client.clone(), config())
            .unwrap();
        let responder = assistant(client, "analyst");

        let outcome = Conversation::new(&initiator, &responder, 10)
            .run("How many orders shipped late?")
            .await
            .unwrap();
        assert!(outcome.is_terminal());
        assert_eq!(outcome.final_answer(), "Nothing else to add.");
    }

    #[tokio::test]
    async fn one_shot_initiator_stops_after_first_reply() {
        let client = ScriptedClient::new(&["[{\"name\": \"A\", \"description\": \"x\"}]"]);
        let initiator = AgentSpec::proxy("asker")
            .build(client.clone(), config())
            .unwrap();
        let responder = assistant(client, "planner");

        let outcome = Conversation::new(&initiator, &responder, 10)
            .run("Plan the report.")
            .await
            .unwrap();
        assert_eq!(outcome.state(), ChatState::AwaitingReply);
        assert!(outcome.last_reply().contains("\"name\""));
    }

    #[tokio::test]
    async fn function_hops_do_not_consume_a_turn() {
        let client = ScriptedClient::new(&[
            r#"{"function": "count_rows", "arguments": {"table": "orders"}}"#,
            "There are 42 orders. TERMINATE",
        ]);
        let initiator = proxy_with_registry(client.clone());
        let responder = assistant(client, "engineer");

        let outcome = Conversation::new(&initiator, &responder, 10)
            .run("Count the orders table.")
            .await
            .unwrap();

        assert!(outcome.is_terminal());
        let results = outcome.function_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name.as_deref(), Some("count_rows"));
        assert!(results[0].content.contains("42 rows"));
        assert_eq!(outcome.final_answer(), "There are 42 orders.");
    }

    #[tokio::test]
    async fn failed_dispatch_feeds_back_into_the_transcript() {
        let client = ScriptedClient::new(&[
            // Missing required argument: validation fails, error goes back.
            r#"{"function": "count_rows", "arguments": {}}"#,
            r#"{"function": "count_rows", "arguments": {"table": "orders"}}"#,
            "Fixed it: 42 orders. TERMINATE",
        ]);
        let initiator = proxy_with_registry(client.clone());
        let responder = assistant(client, "engineer");

        let outcome = Conversation::new(&initiator, &responder, 10)
            .run("Count the orders table.")
            .await
            .unwrap();

        assert!(outcome.is_terminal());
        let results = outcome.function_results();
        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("'table' must be a string"));
        assert!(results[1].content.contains("42 rows"));
    }

    #[tokio::test]
    async fn hop_ceiling_turns_invocations_into_text() {
        let client = ScriptedClient::new(&[
            r#"{"function": "count_rows", "arguments": {"table": "orders"}}"#,
            r#"{"function": "count_rows", "arguments": {"table": "orders"}}"#,
        ]);
        let initiator = proxy_with_registry(client.clone());
        let responder = assistant(client, "engineer");

        let outcome = Conversation::new(&initiator, &responder, 1)
            .run("Count the orders table.")
            .await
            .unwrap();

        // One hop dispatched, the second invocation settles the turn as text.
        assert_eq!(outcome.function_results().len(), 1);
        assert!(outcome.last_reply().contains("count_rows"));
    }

    #[tokio::test]
    async fn completion_failures_propagate() {
        let client = ScriptedClient::new(&[]);
        let initiator = AgentSpec::proxy("asker")
            .build(client.clone(), config())
            .unwrap();
        let responder = assistant(client, "analyst");

        let err = Conversation::new(&initiator, &responder, 10)
            .run("anything")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
