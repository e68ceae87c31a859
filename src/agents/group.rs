//! Multi-party group chat with a manager-selected speaking order
//!
//! Participants share one transcript. Each round the manager reads the
//! transcript and names the next speaker; an unusable selection falls back
//! to round-robin so one confused manager reply never stalls the chat. The
//! chat ends when a speaker emits the sentinel or the round ceiling is hit.
//! A proxy participant (the executor) selected with nothing pending speaks
//! its fixed default, which is the sentinel, so an idle selection ends the
//! chat instead of looping.

use crate::agents::{contains_sentinel, Agent};
use crate::capability::{parse_invocation, CapabilityRegistry};
use crate::core::llm::ChatMessage;
use crate::error::{Error, Result};

/// Finished group transcript. Unlike the two-party outcome, replies here
/// are name-tagged user-role entries; consumers read the function results
/// and the terminal flag, not individual speeches.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    transcript: Vec<ChatMessage>,
    terminated: bool,
}

impl GroupOutcome {
    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn is_terminal(&self) -> bool {
        self.terminated
    }

    /// Every function-role message the chat produced, in order. This is
    /// what the synthesis flows accumulate.
    pub fn function_results(&self) -> Vec<&ChatMessage> {
        self.transcript
            .iter()
            .filter(|m| m.role == "function")
            .collect()
    }
}

pub struct GroupChat<'a> {
    participants: Vec<&'a Agent>,
    manager: &'a Agent,
    max_round: usize,
    max_function_hops: usize,
}

impl<'a> GroupChat<'a> {
    pub fn new(
        participants: Vec<&'a Agent>,
        manager: &'a Agent,
        max_round: usize,
        max_function_hops: usize,
    ) -> Result<Self> {
        if participants.is_empty() {
            return Err(Error::Configuration(
                "a group chat needs at least one participant".to_string(),
            ));
        }
        Ok(Self {
            participants,
            manager,
            max_round,
            max_function_hops,
        })
    }

    /// The dispatch registry is whichever participant carries one.
    fn registry(&self) -> Option<&CapabilityRegistry> {
        self.participants.iter().find_map(|p| p.registry())
    }

    pub async fn run(&self, opening: impl Into<String>) -> Result<GroupOutcome> {
        let mut transcript = vec![ChatMessage::user(opening.into())];
        let mut previous = self.participants.len() - 1;

        for round in 0..self.max_round {
            let speaker_idx = self.select_speaker(&transcript, previous).await?;
            previous = speaker_idx;
            let speaker = self.participants[speaker_idx];
            tracing::debug!("[group] round {}: {} speaks", round + 1, speaker.name());

            let speech = self.speaker_turn(speaker, &mut transcript).await?;
            let terminal = contains_sentinel(&speech);
            transcript.push(tagged(speaker.name(), &speech));
            if terminal {
                return Ok(GroupOutcome {
                    transcript,
                    terminated: true,
                });
            }
        }

        tracing::warn!("[group] hit round ceiling {} without sentinel", self.max_round);
        Ok(GroupOutcome {
            transcript,
            terminated: false,
        })
    }

    /// Ask the manager who speaks next. A reply naming no participant
    /// falls back to round-robin after the previous speaker.
    async fn select_speaker(&self, transcript: &[ChatMessage], previous: usize) -> Result<usize> {
        let roster: Vec<&str> = self.participants.iter().map(|p| p.name()).collect();
        let mut messages = transcript.to_vec();
        messages.push(ChatMessage::user(format!(
            "Read the above conversation. Then select the next role from [{}] to play. Only return the role.",
            roster.join(", ")
        )));

        let reply = self.manager.reply(&messages).await?;
        let choice = self
            .participants
            .iter()
            .position(|p| reply.trim() == p.name())
            .or_else(|| self.participants.iter().position(|p| reply.contains(p.name())));

        Ok(match choice {
            Some(idx) => idx,
            None => {
                let fallback = (previous + 1) % self.participants.len();
                tracing::debug!(
                    "[group] manager reply named nobody, falling back to {}",
                    self.participants[fallback].name()
                );
                fallback
            }
        })
    }

    /// One speaking turn, function hops included; mirrors the two-party
    /// engine except the invocation may come from any speaker while the
    /// registry lives on the executor.
    async fn speaker_turn(&self, speaker: &Agent, transcript: &mut Vec<ChatMessage>) -> Result<String> {
        let mut hops = 0;
        loop {
            let text = speaker.reply(transcript).await?;

            let (registry, call) = match (self.registry(), parse_invocation(&text)) {
                (Some(registry), Some(call)) if hops < self.max_function_hops => (registry, call),
                _ => return Ok(text),
            };

            tracing::info!("[group] {} invokes '{}'", speaker.name(), call.function);
            transcript.push(tagged(speaker.name(), &text));

            let output = match registry.dispatch(&call).await {
                Ok(output) => output,
                Err(err @ (Error::Capability { .. } | Error::Parse(_))) => {
                    tracing::warn!("[group] '{}' failed: {err}", call.function);
                    err.to_string()
                }
                Err(err) => return Err(err),
            };
            transcript.push(ChatMessage::function(call.function, output));
            hops += 1;
        }
    }
}

/// Group speech travels as a name-tagged user-role entry so every other
/// participant (and the manager) sees who said what.
fn tagged(name: &str, content: &str) -> ChatMessage {
    ChatMessage::user(format!("{name}: {content}"))
}
