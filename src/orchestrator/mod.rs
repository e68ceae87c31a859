//! Task orchestration
//!
//! The `TaskOrchestrator` is the public surface of the conversation core:
//! it classifies questions, runs the report and analysis flows, handles
//! chart deletion and direct answers, and maps every internal failure to
//! the locale's fixed message set. Nothing here returns `Err` to the
//! caller for a user question — the answer is always a string, possibly a
//! fallback one.

pub mod pipeline;

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::agents::{Agent, AgentSet, Conversation, GroupChat, SelectorMode};
use crate::capability::{parse_invocation, ChartService};
use crate::config::Settings;
use crate::core::budget::AccumulatedContext;
use crate::core::extract::{self, TaskDemand};
use crate::core::llm::ChatMessage;
use crate::error::{Error, Result};
use crate::locale::LocaleStrings;
use pipeline::{run_flow, with_retry, FlowLimits, SynthesisFlow};

/// Which conversation type this orchestrator serves. Report sessions only
/// generate reports; everything else is redirected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Chat,
    Report,
}

/// What the classifier decided a question wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    GenerateReport,
    AnalyzeData,
    DeleteChart,
    Direct,
}

impl TaskKind {
    fn from_function(name: &str) -> Option<Self> {
        match name {
            "generate_report" => Some(TaskKind::GenerateReport),
            "analysis_data" => Some(TaskKind::AnalyzeData),
            "delete_chart" => Some(TaskKind::DeleteChart),
            "other" | "base" => Some(TaskKind::Direct),
            _ => None,
        }
    }
}

pub struct TaskOrchestrator {
    agents: AgentSet,
    charts: Arc<dyn ChartService>,
    mode: ChatMode,
    model: String,
    max_retry_times: usize,
    max_round: usize,
    max_function_hops: usize,
    report_ceiling: usize,
    analysis_ceiling: usize,
}

impl TaskOrchestrator {
    pub fn new(
        agents: AgentSet,
        charts: Arc<dyn ChartService>,
        settings: &Settings,
        mode: ChatMode,
    ) -> Self {
        Self {
            agents,
            charts,
            mode,
            model: settings.llm.model.clone(),
            max_retry_times: settings.orchestrator.max_retry_times,
            max_round: settings.orchestrator.max_round,
            max_function_hops: settings.orchestrator.max_function_hops,
            report_ceiling: settings.orchestrator.report_token_ceiling,
            analysis_ceiling: settings.orchestrator.analysis_token_ceiling,
        }
    }

    pub fn agents(&self) -> &AgentSet {
        &self.agents
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    fn strings(&self) -> &'static LocaleStrings {
        self.agents.profile().locale.strings()
    }

    fn user(&self) -> &str {
        &self.agents.profile().user_name
    }

    fn limits(&self) -> FlowLimits {
        FlowLimits {
            max_retry_times: self.max_retry_times,
        }
    }

    /// Classify the question and run the matching operation.
    pub async fn dispatch(&self, question: &str) -> String {
        let mode = match self.mode {
            ChatMode::Chat => SelectorMode::Full,
            ChatMode::Report => SelectorMode::ReportOnly,
        };

        let kind = with_retry(self.max_retry_times, self.user(), "task selection", || {
            self.classify(question, mode).boxed()
        })
        .await
        .ok();

        match kind {
            Some(TaskKind::GenerateReport) => self.generate_report(question).await,
            Some(TaskKind::AnalyzeData) => self.analyze_data(question).await,
            Some(TaskKind::DeleteChart) => self.delete_chart(question).await,
            Some(TaskKind::Direct) => self.answer_direct(question).await,
            None => self.strings().timeout.to_string(),
        }
    }

    async fn classify(&self, question: &str, mode: SelectorMode) -> Result<TaskKind> {
        let proxy = self.agents.planner_proxy()?;
        let selector = self.agents.task_selector(mode)?;
        let outcome = Conversation::new(&proxy, &selector, 0).run(question).await?;

        let call = parse_invocation(outcome.last_reply())
            .ok_or_else(|| Error::Parse("selector reply named no task".to_string()))?;
        let kind = TaskKind::from_function(&call.function)
            .ok_or_else(|| Error::Parse(format!("selector named unknown task '{}'", call.function)))?;

        // A report-only session must not be routed to chat-only tasks even
        // if the selector hallucinates one.
        if mode == SelectorMode::ReportOnly && kind != TaskKind::GenerateReport {
            return Ok(TaskKind::Direct);
        }
        Ok(kind)
    }

    /// Plan the requested report, run one group chat per chart, synthesize
    /// a summary from everything the charts fetched and rendered.
    pub async fn generate_report(&self, question: &str) -> String {
        let flow = ReportFlow {
            orchestrator: self,
            question,
        };
        run_flow(&flow, self.limits(), self.user(), self.strings().timeout).await
    }

    /// Plan the data fetches the question needs, run them, answer the
    /// question verbatim from the accumulated results.
    pub async fn analyze_data(&self, question: &str) -> String {
        let flow = AnalysisFlow {
            orchestrator: self,
            question,
        };
        run_flow(&flow, self.limits(), self.user(), self.strings().timeout).await
    }

    /// Map the request onto existing chart names and delete the matches.
    ///
    /// The chart-list fetch is not retried: if the store cannot even be
    /// listed there is nothing a second attempt would fix.
    pub async fn delete_chart(&self, question: &str) -> String {
        let strings = self.strings();

        let existing = match self.charts.existing().await {
            Ok(names) => names,
            Err(err) => {
                tracing::error!("[{}] chart list fetch failed: {err}", self.user());
                return strings.fetch_data_failed.to_string();
            }
        };

        let opening = format!(
            "Existing charts: {}.{}{}",
            serde_json::to_string(&existing).unwrap_or_default(),
            strings.question_ask,
            question
        );

        let reply = match self.deleter_reply(&opening).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!("[{}] deleter conversation failed: {err}", self.user());
                return strings.timeout.to_string();
            }
        };

        let demands = match extract::extract_delete_demands(&reply) {
            Ok(demands) => demands,
            Err(err) => {
                tracing::warn!("[{}] deleter reply unusable: {err}", self.user());
                return strings.delete_chart_failed.to_string();
            }
        };
        if demands.is_empty() {
            return strings.delete_chart_failed.to_string();
        }

        let names: Vec<String> = demands.into_iter().map(|d| d.report_name).collect();
        match self.charts.delete(&names).await {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("[{}] deletion failed: {err}", self.user());
                strings.delete_chart_failed.to_string()
            }
        }
    }

    async fn deleter_reply(&self, opening: &str) -> Result<String> {
        let proxy = self.agents.planner_proxy()?;
        let deleter = self.agents.chart_deleter()?;
        let outcome = Conversation::new(&proxy, &deleter, 0).run(opening).await?;
        Ok(outcome.last_reply().to_string())
    }

    /// Answer a question that needs no data fetching. Report sessions
    /// redirect anything that is not a report request.
    pub async fn answer_direct(&self, question: &str) -> String {
        if self.mode == ChatMode::Report {
            return self.strings().report_questions_only.to_string();
        }

        let answer = with_retry(self.max_retry_times, self.user(), "direct answer", || {
            async {
                let proxy = self.agents.planner_proxy()?;
                let analyst = self.agents.analyst()?;
                let outcome = Conversation::new(&proxy, &analyst, 0)
                    .run(format!("{}{}", self.strings().question_ask, question))
                    .await?;
                Ok(outcome.final_answer())
            }
            .boxed()
        })
        .await;

        answer.unwrap_or_else(|_| self.strings().timeout.to_string())
    }

    /// Explain the configured data source to the user.
    pub async fn describe_data(&self) -> String {
        let answer = with_retry(self.max_retry_times, self.user(), "data description", || {
            async {
                let proxy = self.agents.planner_proxy()?;
                let describer = self.agents.data_describer()?;
                let outcome = Conversation::new(&proxy, &describer, 0)
                    .run(self.strings().describe_data_ask)
                    .await?;
                Ok(outcome.final_answer())
            }
            .boxed()
        })
        .await;

        answer.unwrap_or_else(|_| self.strings().timeout.to_string())
    }

    /// One sub-task group chat; returns the function results it produced.
    async fn run_group(
        &self,
        demand: &TaskDemand,
        with_presenter: bool,
    ) -> Result<Vec<ChatMessage>> {
        let engineer = self.agents.sql_engineer()?;
        let executor = self.agents.executor_proxy()?;
        let presenter = if with_presenter {
            Some(self.agents.chart_presenter()?)
        } else {
            None
        };
        let manager = self.agents.group_manager()?;

        let mut participants = vec![&engineer, &executor];
        if let Some(presenter) = presenter.as_ref() {
            participants.push(presenter);
        }

        let chat = GroupChat::new(participants, &manager, self.max_round, self.max_function_hops)?;
        let outcome = chat
            .run(format!("{}: {}", demand.name, demand.description))
            .await?;

        Ok(outcome
            .function_results()
            .into_iter()
            .cloned()
            .collect())
    }

    /// One-shot planning conversation; returns the extracted demands.
    async fn run_planning(&self, planner: Agent, question: &str) -> Result<Vec<TaskDemand>> {
        let proxy = self.agents.planner_proxy()?;
        let outcome = Conversation::new(&proxy, &planner, 0).run(question).await?;
        extract::extract_demands(outcome.last_reply())
    }

    /// Synthesis conversation over the trimmed context.
    async fn run_synthesis(&self, context: &AccumulatedContext, question: &str) -> Result<String> {
        let proxy = self.agents.planner_proxy()?;
        let analyst = self.agents.analyst()?;
        let opening = format!(
            "{}{}{}",
            context.rendered(),
            self.strings().question_ask,
            question
        );
        let outcome = Conversation::new(&proxy, &analyst, 0).run(opening).await?;
        Ok(outcome.last_reply().to_string())
    }
}

struct ReportFlow<'a> {
    orchestrator: &'a TaskOrchestrator,
    question: &'a str,
}

#[async_trait]
impl SynthesisFlow for ReportFlow<'_> {
    fn name(&self) -> &'static str {
        "report"
    }

    fn ceiling(&self) -> usize {
        self.orchestrator.report_ceiling
    }

    fn model(&self) -> &str {
        &self.orchestrator.model
    }

    async fn plan(&self) -> Result<Vec<TaskDemand>> {
        let planner = self.orchestrator.agents.report_planner()?;
        self.orchestrator.run_planning(planner, self.question).await
    }

    async fn run_sub_task(&self, demand: &TaskDemand) -> Result<Vec<ChatMessage>> {
        self.orchestrator.run_group(demand, true).await
    }

    async fn synthesize(&self, context: &AccumulatedContext) -> Result<String> {
        self.orchestrator.run_synthesis(context, self.question).await
    }

    fn budget_exhausted_message(&self) -> &'static str {
        self.orchestrator.strings().report_failed
    }

    fn failure_message(&self) -> &'static str {
        self.orchestrator.strings().report_failed
    }
}

struct AnalysisFlow<'a> {
    orchestrator: &'a TaskOrchestrator,
    question: &'a str,
}

#[async_trait]
impl SynthesisFlow for AnalysisFlow<'_> {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn ceiling(&self) -> usize {
        self.orchestrator.analysis_ceiling
    }

    fn model(&self) -> &str {
        &self.orchestrator.model
    }

    async fn plan(&self) -> Result<Vec<TaskDemand>> {
        let planner = self.orchestrator.agents.analysis_planner()?;
        self.orchestrator.run_planning(planner, self.question).await
    }

    async fn run_sub_task(&self, demand: &TaskDemand) -> Result<Vec<ChatMessage>> {
        self.orchestrator.run_group(demand, false).await
    }

    async fn synthesize(&self, context: &AccumulatedContext) -> Result<String> {
        self.orchestrator.run_synthesis(context, self.question).await
    }

    fn budget_exhausted_message(&self) -> &'static str {
        self.orchestrator.strings().cannot_answer
    }

    fn failure_message(&self) -> &'static str {
        self.orchestrator.strings().analysis_failed
    }
}
