//! High-level facade
//!
//! One-call helpers for embedding the assistant: build everything from
//! `Settings` (completion client, SQLite demo backend, chart store,
//! capability registry), then ask questions without touching the
//! orchestration machinery. The CLI and the batch module sit on top of
//! this.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::agents::{AgentSet, SessionProfile};
use crate::capability::{
    CapabilityRegistry, ChartService, CodeRunner, DataFlavor, DeleteChartCapability,
    LocalChartStore, RenderChartCapability, RunQueryCapability, SqliteRunner,
};
use crate::config::Settings;
use crate::core::llm::{ChatCompletion, CompletionConfig, OpenAiClient};
use crate::locale::Locale;
use crate::orchestrator::{ChatMode, TaskOrchestrator};
use crate::session::{Outbound, Session};
use crate::storage::{ChatMemory, InMemoryChatMemory};

pub struct Assistant {
    orchestrator: Arc<TaskOrchestrator>,
    memory: Arc<dyn ChatMemory>,
    settings: Settings,
}

impl Assistant {
    /// Build from settings with the production completion client. Needs
    /// `OPENAI_API_KEY` in the environment.
    pub async fn from_settings(settings: Settings, mode: ChatMode) -> Result<Self> {
        let api_key = Settings::api_key()?;
        let client: Arc<dyn ChatCompletion> = Arc::new(OpenAiClient::new(api_key, &settings.llm));
        Self::with_client(settings, mode, client).await
    }

    /// Build with a caller-supplied completion client; tests script this.
    pub async fn with_client(
        settings: Settings,
        mode: ChatMode,
        client: Arc<dyn ChatCompletion>,
    ) -> Result<Self> {
        let flavor = DataFlavor::resolve(&settings.data.database)?;
        let locale = Locale::resolve(&settings.data.language)?;

        let runner: Arc<SqliteRunner> =
            Arc::new(SqliteRunner::open(settings.data.sqlite_path.as_deref())?);
        let charts: Arc<dyn ChartService> = Arc::new(LocalChartStore::new());
        let schema_note = runner.describe_schema().await?;

        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(RunQueryCapability::new(
            runner,
            flavor,
            Duration::from_secs(settings.llm.request_timeout_secs),
        )))?;
        registry.register(Arc::new(RenderChartCapability::new(charts.clone())))?;
        registry.register(Arc::new(DeleteChartCapability::new(charts.clone())))?;

        let profile = SessionProfile {
            user_name: "local".to_string(),
            locale,
            flavor,
            schema_note,
        };
        let agents = AgentSet::new(
            client,
            CompletionConfig::from_settings(&settings.llm),
            profile,
            registry,
        )?;
        let orchestrator = Arc::new(TaskOrchestrator::new(agents, charts, &settings, mode));

        Ok(Self {
            orchestrator,
            memory: Arc::new(InMemoryChatMemory::new()),
            settings,
        })
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    /// Open an envelope-consuming session sharing this assistant's
    /// orchestrator and memory.
    pub fn open_session(
        &self,
        id: impl Into<String>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Session {
        Session::new(
            id,
            self.orchestrator.clone(),
            self.memory.clone(),
            outbound,
            &self.settings,
        )
    }

    /// Classify and answer; the exchange is recorded in chat memory.
    pub async fn dispatch(&self, question: &str) -> String {
        let answer = self.orchestrator.dispatch(question).await;
        self.record(question, &answer).await;
        answer
    }

    pub async fn generate_report(&self, question: &str) -> String {
        let answer = self.orchestrator.generate_report(question).await;
        self.record(question, &answer).await;
        answer
    }

    pub async fn analyze_data(&self, question: &str) -> String {
        let answer = self.orchestrator.analyze_data(question).await;
        self.record(question, &answer).await;
        answer
    }

    pub async fn delete_chart(&self, question: &str) -> String {
        let answer = self.orchestrator.delete_chart(question).await;
        self.record(question, &answer).await;
        answer
    }

    /// Verify the configured credentials with the probe conversation.
    pub async fn check_api_key(&self) -> String {
        let strings = self.orchestrator.agents().profile().locale.strings();
        if Settings::api_key().is_err() {
            return strings.key_not_saved.to_string();
        }

        let (tx, _rx) = mpsc::unbounded_channel();
        let session = self.open_session("key-check", tx);
        session.probe_api_key().await.to_string()
    }

    async fn record(&self, question: &str, answer: &str) {
        if let Err(err) = self.memory.record_exchange("default", question, answer).await {
            tracing::warn!("[Assistant] could not record exchange: {err}");
        }
    }
}

/// Concurrent question batches: independent questions answered through the
/// same assistant with bounded parallelism.
pub mod batch {
    use futures::{stream, StreamExt};

    use super::Assistant;

    pub async fn answer_all(
        assistant: &Assistant,
        questions: Vec<String>,
        concurrency: usize,
    ) -> Vec<(String, String)> {
        stream::iter(questions)
            .map(|question| async move {
                let answer = assistant.dispatch(&question).await;
                (question, answer)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }
}
