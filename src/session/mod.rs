//! Session envelope handling
//!
//! A session consumes inbound request envelopes, routes them through the
//! task orchestrator and pushes outbound envelopes onto its queue. The
//! session never crashes on bad input: unparseable envelopes and unknown
//! state codes come back as `state=500` answers in the session's locale,
//! and heartbeats are echoed untouched.

pub mod annotation;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agents::Conversation;
use crate::config::Settings;
use crate::error::Result;
use crate::locale::LocaleStrings;
use crate::orchestrator::{ChatMode, TaskOrchestrator};
use crate::storage::ChatMemory;

pub const HEARTBEAT_SENDER: &str = "heartCheck";

/// Inbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub state: u16,
    pub data: Payload,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub chat_type: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub data_type: String,
    pub content: Value,
}

/// Outbound envelope pushed onto the session queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outbound {
    pub state: u16,
    pub data: Payload,
    pub receiver: String,
}

impl Outbound {
    fn answer(state: u16, data_type: &str, content: impl Into<Value>, receiver: &str) -> Self {
        Self {
            state,
            data: Payload {
                data_type: data_type.to_string(),
                content: content.into(),
            },
            receiver: receiver.to_string(),
        }
    }
}

pub struct Session {
    id: String,
    orchestrator: Arc<TaskOrchestrator>,
    memory: Arc<dyn ChatMemory>,
    outbound: mpsc::UnboundedSender<Outbound>,
    check_timeout: Duration,
    annotation_ceiling: usize,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        orchestrator: Arc<TaskOrchestrator>,
        memory: Arc<dyn ChatMemory>,
        outbound: mpsc::UnboundedSender<Outbound>,
        settings: &Settings,
    ) -> Self {
        Self {
            id: id.into(),
            orchestrator,
            memory,
            outbound,
            check_timeout: Duration::from_secs(settings.session.check_timeout_secs),
            annotation_ceiling: settings.session.annotation_token_ceiling,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    fn strings(&self) -> &'static LocaleStrings {
        self.orchestrator.agents().profile().locale.strings()
    }

    fn send(&self, outbound: Outbound) {
        if self.outbound.send(outbound).is_err() {
            tracing::warn!("[Session {}] outbound queue closed", self.id);
        }
    }

    /// Consume one raw inbound message. Every path ends with at least one
    /// outbound envelope except an inbound `state=500`, which is only
    /// logged.
    pub async fn consume(&self, raw: &str) {
        let strings = self.strings();

        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!("[Session {}] unparseable envelope: {err}", self.id);
                self.send(Outbound::answer(500, "answer", strings.bad_envelope, &self.id));
                return;
            }
        };

        // Heartbeats are echoed back untouched, before any validation.
        if envelope.sender.as_deref() == Some(HEARTBEAT_SENDER) {
            self.send(Outbound {
                state: envelope.state,
                data: envelope.data,
                receiver: HEARTBEAT_SENDER.to_string(),
            });
            return;
        }

        let receiver = envelope.sender.clone().unwrap_or_else(|| self.id.clone());

        match envelope.state {
            200 => {}
            500 => {
                tracing::warn!("[Session {}] peer reported state 500, dropping", self.id);
                return;
            }
            other => {
                tracing::warn!("[Session {}] unknown state code {other}", self.id);
                self.send(Outbound::answer(
                    500,
                    "answer",
                    strings.status_code_error,
                    &receiver,
                ));
                return;
            }
        }

        if envelope.chat_type.as_deref() == Some("test") {
            let verdict = self.probe_api_key().await;
            self.send(Outbound::answer(200, "answer", verdict, &receiver));
            return;
        }

        // Report sessions cannot chart CSV uploads; reject instead of
        // silently dropping the request.
        let report = envelope.chat_type.as_deref() == Some("report")
            || self.orchestrator.mode() == ChatMode::Report;
        if report && envelope.database.as_deref() == Some("csv") {
            self.send(Outbound::answer(500, "answer", strings.bad_envelope, &receiver));
            return;
        }

        match envelope.data.data_type.as_str() {
            "question" => {
                let question = match envelope.data.content.as_str() {
                    Some(question) => question.to_string(),
                    None => {
                        self.send(Outbound::answer(500, "answer", strings.bad_envelope, &receiver));
                        return;
                    }
                };

                let answer = self.orchestrator.dispatch(&question).await;
                if let Err(err) = self.memory.record_exchange(&self.id, &question, &answer).await {
                    tracing::warn!("[Session {}] could not record exchange: {err}", self.id);
                }
                self.send(Outbound::answer(200, "answer", answer, &receiver));
            }
            "comment_first" => {
                let description = self.orchestrator.describe_data().await;
                self.send(Outbound::answer(200, "comment_first", description, &receiver));
            }
            "comment" => {
                let tables = match envelope.data.content {
                    Value::Array(tables) => tables,
                    _ => {
                        self.send(Outbound::answer(500, "answer", strings.bad_envelope, &receiver));
                        return;
                    }
                };
                annotation::check_annotations(self, tables, &receiver).await;
            }
            other => {
                tracing::warn!("[Session {}] unknown data_type '{other}'", self.id);
                self.send(Outbound::answer(500, "answer", strings.bad_envelope, &receiver));
            }
        }
    }

    /// One-shot probe conversation verifying the completion credentials:
    /// a trivially checkable question under the verification timeout. A
    /// wrong answer or a timeout is a failed test; a conversation that
    /// errors out means the key itself does not work.
    pub async fn probe_api_key(&self) -> &'static str {
        let strings = self.strings();
        let probe = async {
            let agents = self.orchestrator.agents();
            let proxy = agents.planner_proxy()?;
            let responder = agents.probe()?;
            let outcome = Conversation::new(&proxy, &responder, 0).run("5-2 =??").await?;
            Ok::<String, crate::error::Error>(outcome.final_answer())
        };

        match tokio::time::timeout(self.check_timeout, probe).await {
            Ok(Ok(answer)) if answer.contains('3') => strings.test_pass,
            Ok(Ok(answer)) => {
                tracing::warn!("[Session {}] probe answered '{answer}'", self.id);
                strings.test_fail
            }
            Ok(Err(err)) => {
                tracing::warn!("[Session {}] probe failed: {err}", self.id);
                strings.bad_api_key
            }
            Err(_) => {
                tracing::warn!("[Session {}] probe timed out", self.id);
                strings.test_fail
            }
        }
    }

    pub(crate) fn emit(&self, outbound: Outbound) {
        self.send(outbound);
    }

    pub(crate) fn check_timeout(&self) -> Duration {
        self.check_timeout
    }

    pub(crate) fn annotation_ceiling(&self) -> usize {
        self.annotation_ceiling
    }

    pub(crate) async fn checker_reply(&self, opening: &str) -> Result<String> {
        let agents = self.orchestrator.agents();
        let proxy = agents.planner_proxy()?;
        let checker = agents.annotation_checker()?;
        let outcome = Conversation::new(&proxy, &checker, 0).run(opening).await?;
        Ok(outcome.last_reply().to_string())
    }
}
