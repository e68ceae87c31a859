//! Role factory
//!
//! Builds the per-session cast of agents: planners, the SQL engineer, the
//! chart presenter, the analyst, the deleter, the verification roles and
//! the proxies that drive them. Every instruction payload is assembled
//! here so prompt wording lives in one place; the orchestrator only ever
//! asks for roles by name. Capability coverage is validated at
//! construction, before any conversation starts.

use std::sync::Arc;

use crate::agents::{Agent, AgentSpec};
use crate::capability::{CapabilityRegistry, DataFlavor};
use crate::core::llm::{ChatCompletion, CompletionConfig};
use crate::error::Result;
use crate::locale::Locale;

/// What the dispatch classifier may route to. Report-mode sessions only
/// distinguish report requests from everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorMode {
    Full,
    ReportOnly,
}

/// Per-session facts every prompt needs: who is asking, in which language
/// the answer must come, which dialect the engineer writes, and what the
/// data looks like.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub user_name: String,
    pub locale: Locale,
    pub flavor: DataFlavor,
    /// Table/column notes seeded into engineering and planning prompts.
    pub schema_note: String,
}

pub struct AgentSet {
    client: Arc<dyn ChatCompletion>,
    config: CompletionConfig,
    profile: SessionProfile,
    registry: CapabilityRegistry,
}

impl AgentSet {
    pub fn new(
        client: Arc<dyn ChatCompletion>,
        config: CompletionConfig,
        profile: SessionProfile,
        registry: CapabilityRegistry,
    ) -> Result<Self> {
        registry.ensure_covers(&["run_query", "render_chart", "delete_chart"])?;
        Ok(Self {
            client,
            config,
            profile,
            registry,
        })
    }

    pub fn profile(&self) -> &SessionProfile {
        &self.profile
    }

    fn answer_language(&self) -> &'static str {
        self.profile.locale.strings().answer_language
    }

    fn build(&self, spec: AgentSpec) -> Result<Agent> {
        spec.build(self.client.clone(), self.config.clone())
    }

    /// One-shot initiator: asks a question, reads exactly one reply.
    pub fn planner_proxy(&self) -> Result<Agent> {
        self.build(AgentSpec::proxy("planner_user"))
    }

    /// Non-LLM group participant carrying the capability registry. When
    /// selected with nothing pending it speaks its default, the sentinel,
    /// which ends the chat.
    pub fn executor_proxy(&self) -> Result<Agent> {
        let mut spec = AgentSpec::proxy("executor");
        spec.registry = Some(self.registry.clone());
        self.build(spec)
    }

    pub fn sql_engineer(&self) -> Result<Agent> {
        let dialect = match self.profile.flavor {
            DataFlavor::Mysql => "MySQL SQL",
            DataFlavor::Postgres => "PostgreSQL SQL",
            DataFlavor::Csv => "Python (pandas) code against the CSV files",
        };
        let message = format!(
            "You are a data engineer. Write {dialect} to obtain the data each request needs, \
             then invoke run_query to execute it.\n\
             Data description:\n{schema}\n\
             Available functions:\n{functions}\
             Inspect the function output: if the exit code is non-zero or the rows do not \
             answer the request, revise the code and run it again. When the data is in hand, \
             summarize it as plain text. {lang}",
            schema = self.profile.schema_note,
            functions = self.registry.description(),
            lang = self.answer_language(),
        );
        self.build(AgentSpec::assistant("sql_engineer", message))
    }

    pub fn chart_presenter(&self) -> Result<Agent> {
        let message = format!(
            "You are a chart designer. Turn the fetched data into chart configurations and \
             invoke render_chart with them.\n\
             Each chart object has: name (string), globalSeriesType (one of line, column, \
             area, pie, scanner, bubble, heatmap, box, table) and columnMapping. \
             columnMapping maps each used column to \"x\" or \"y\"; at most one column maps \
             to \"x\" and at least one must map to \"y\". For globalSeriesType \"table\" the \
             columnMapping is the empty string \"\".\n\
             Available functions:\n{functions}\
             After the charts render successfully, reply TERMINATE. {lang}",
            functions = self.registry.description(),
            lang = self.answer_language(),
        );
        self.build(AgentSpec::assistant("chart_presenter", message))
    }

    /// Synthesis role: answers the user's question from accumulated
    /// sub-task output, nothing else.
    pub fn analyst(&self) -> Result<Agent> {
        let message = format!(
            "You are a data analyst. Answer the user's question strictly from the data \
             provided in the message; do not invent figures. Give a clear, complete answer \
             and finish your reply with TERMINATE. {lang}",
            lang = self.answer_language(),
        );
        self.build(AgentSpec::assistant("analyst", message))
    }

    /// Splits a report request into per-chart sub-tasks.
    pub fn report_planner(&self) -> Result<Agent> {
        let message = format!(
            "You are a report planner. Break the user's report request into the charts it \
             needs, using the data description below to decide what is answerable.\n\
             Data description:\n{schema}\n\
             Reply with a JSON array only, one element per chart: \
             [{{\"name\": \"<chart name>\", \"description\": \"<what the chart shows and \
             which data it needs>\"}}]. {lang}",
            schema = self.profile.schema_note,
            lang = self.answer_language(),
        );
        self.build(AgentSpec::assistant("report_planner", message))
    }

    /// Splits an analysis question into the data-fetch sub-tasks it needs.
    pub fn analysis_planner(&self) -> Result<Agent> {
        let message = format!(
            "You are an analysis planner. Decide which pieces of data are needed to answer \
             the user's question, using the data description below.\n\
             Data description:\n{schema}\n\
             Reply with a JSON array only, one element per piece: \
             [{{\"name\": \"<short label>\", \"description\": \"<which data to fetch and \
             how>\"}}]. {lang}",
            schema = self.profile.schema_note,
            lang = self.answer_language(),
        );
        self.build(AgentSpec::assistant("analysis_planner", message))
    }

    /// Maps a delete request onto the existing chart names.
    pub fn chart_deleter(&self) -> Result<Agent> {
        let message = format!(
            "You decide which existing charts a deletion request refers to. The request \
             comes with the list of chart names that currently exist. Reply with a JSON \
             array only: [{{\"report_name\": \"<exact existing chart name>\"}}]. Include \
             only names from the list; if nothing matches, reply []. {lang}",
            lang = self.answer_language(),
        );
        self.build(AgentSpec::assistant("chart_deleter", message))
    }

    /// Explains the schema to the user in plain language.
    pub fn data_describer(&self) -> Result<Agent> {
        let message = format!(
            "You explain datasets to business users. Describe what the data below contains \
             and what kinds of questions it can answer, briefly and concretely.\n\
             Data description:\n{schema}\n{lang}",
            schema = self.profile.schema_note,
            lang = self.answer_language(),
        );
        self.build(AgentSpec::assistant("data_describer", message))
    }

    /// Reviews table/column comments for completeness and correctness.
    pub fn annotation_checker(&self) -> Result<Agent> {
        let message = format!(
            "You review database annotations. Given one table with its column comments, \
             judge whether every comment is present and correctly describes its column. \
             Reply with the same structure inside a ```json fenced block, setting \
             \"is_pass\" to 1 where the comment is usable and 0 where it is missing or \
             wrong, both per column and for the table as a whole. {lang}",
            lang = self.answer_language(),
        );
        self.build(AgentSpec::assistant("annotation_checker", message))
    }

    /// Minimal role behind the API-key probe: answers a trivial question so
    /// the session can tell a working key from a broken one.
    pub fn probe(&self) -> Result<Agent> {
        self.build(AgentSpec::assistant(
            "probe",
            "Answer the question directly and briefly.".to_string(),
        ))
    }

    /// Classifier behind dispatch: names which operation a question wants.
    pub fn task_selector(&self, mode: SelectorMode) -> Result<Agent> {
        let options = match mode {
            SelectorMode::Full => {
                "- generate_report: the user wants a report or dashboard generated\n\
                 - analysis_data: the user asks a question to be answered from the data\n\
                 - delete_chart: the user wants existing charts deleted\n\
                 - other: anything else"
            }
            SelectorMode::ReportOnly => {
                "- generate_report: the user wants a report or dashboard generated\n\
                 - base: anything else"
            }
        };
        let message = format!(
            "You route user requests. Pick exactly one task for the message:\n{options}\n\
             Reply with a JSON object only: {{\"function\": \"<task>\", \"arguments\": {{}}}}."
        );
        self.build(AgentSpec::assistant("task_selector", message))
    }

    /// Speaker selector for group chats.
    pub fn group_manager(&self) -> Result<Agent> {
        self.build(AgentSpec::assistant(
            "manager",
            "You coordinate a role-play between data roles. When asked, select which role \
             should act next and reply with that role's name only."
                .to_string(),
        ))
    }
}
