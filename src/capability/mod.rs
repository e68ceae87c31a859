//! Agent-invocable capabilities and their dispatch table
//!
//! An assistant agent never touches the database or the chart store
//! directly: it emits a function-call request in its reply, and the
//! conversation engine dispatches it through the registry carried by the
//! executor-proxy agent. Registration is validated up front — a function
//! name an agent can emit but nobody handles is a configuration error at
//! construction time, not a surprise mid-conversation.

pub mod handlers;
pub mod sqlite;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::extract;
use crate::error::{Error, Result};

pub use handlers::{
    ChartSpec, ColumnMapping, DeleteChartCapability, RenderChartCapability, RunQueryCapability,
    SeriesType,
};
pub use sqlite::{LocalChartStore, SqliteRunner};

/// Which dialect the engineer agent writes and the runner executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFlavor {
    Mysql,
    #[serde(rename = "pg")]
    Postgres,
    Csv,
}

impl DataFlavor {
    pub fn resolve(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(DataFlavor::Mysql),
            "pg" | "postgres" | "postgresql" => Ok(DataFlavor::Postgres),
            "csv" => Ok(DataFlavor::Csv),
            other => Err(Error::Configuration(format!(
                "unknown database flavor '{other}', expected mysql, pg or csv"
            ))),
        }
    }

    /// Language tag handed to the code runner with each query.
    pub fn language(&self) -> &'static str {
        match self {
            DataFlavor::Mysql => "mysql",
            DataFlavor::Postgres => "postgresql",
            DataFlavor::Csv => "python",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataFlavor::Mysql => "mysql",
            DataFlavor::Postgres => "pg",
            DataFlavor::Csv => "csv",
        }
    }
}

/// Outcome of one code-runner invocation.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub logs: String,
}

/// Code-execution collaborator: runs a generated query/script and returns
/// exit code plus captured output. Sandboxing is the implementation's
/// concern, not the orchestrator's.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, code: &str, language: &str, timeout: Duration) -> Result<RunOutput>;

    /// Human-readable schema notes for seeding agent prompts.
    async fn describe_schema(&self) -> Result<String>;
}

/// Chart lifecycle collaborator: render new charts, delete by name, list
/// what exists. Listing doubles as the data-query capability the delete
/// flow opens with.
#[async_trait]
pub trait ChartService: Send + Sync {
    async fn render(&self, charts: &[ChartSpec], name: &str) -> Result<String>;
    async fn delete(&self, names: &[String]) -> Result<String>;
    async fn existing(&self) -> Result<Vec<String>>;
}

/// Declared shape of one capability, rendered into agent prompts.
#[derive(Debug, Clone)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: String,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            description: description.to_string(),
            required: true,
        }
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn spec(&self) -> CapabilitySpec;

    /// Cheap structural check before execution; rejected arguments never
    /// reach the collaborator.
    fn validate(&self, args: &Value) -> Result<()>;

    /// Execute and return the function-role message body.
    async fn execute(&self, args: Value) -> Result<String>;
}

/// A function-call request parsed out of an agent reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    pub function: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Find a capability invocation inside free reply text.
///
/// The completion boundary returns text only, so invocations travel as a
/// JSON object `{"function": ..., "arguments": {...}}` embedded in the
/// reply. Replies without such an object are ordinary text, not errors.
pub fn parse_invocation(text: &str) -> Option<FunctionCall> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let value = extract::parse_fragment(&text[start..=end]).ok()?;
    if !value.get("function").map_or(false, Value::is_string) {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Name → handler dispatch table carried by an executor-proxy agent.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<()> {
        let name = capability.spec().name;
        if self.capabilities.contains_key(&name) {
            return Err(Error::Configuration(format!(
                "capability '{name}' registered twice"
            )));
        }
        tracing::debug!("[CapabilityRegistry] registered '{name}'");
        self.capabilities.insert(name, capability);
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Fail fast if any of `required` has no registered handler. Called at
    /// agent-construction time so a schema/handler mismatch never reaches a
    /// live conversation.
    pub fn ensure_covers(&self, required: &[&str]) -> Result<()> {
        for name in required {
            if !self.has(name) {
                return Err(Error::Configuration(format!(
                    "no handler registered for capability '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Prompt block describing every capability and how to invoke it.
    pub fn description(&self) -> String {
        let mut out = String::new();
        for name in self.names() {
            let spec = self.capabilities[&name].spec();
            let _ = writeln!(out, "- {}: {}", spec.name, spec.description);
            for param in &spec.parameters {
                let _ = writeln!(
                    out,
                    "    {} ({}{}): {}",
                    param.name,
                    param.param_type,
                    if param.required { ", required" } else { "" },
                    param.description
                );
            }
        }
        out.push_str(
            "To invoke one, reply with a JSON object: \
             {\"function\": \"<name>\", \"arguments\": {...}}\n",
        );
        out
    }

    /// Validate and execute an invocation. Collaborator failures come back
    /// as `Err`; the engine decides whether to surface them as function
    /// output so the conversation can self-correct.
    pub async fn dispatch(&self, call: &FunctionCall) -> Result<String> {
        let capability = self.get(&call.function).ok_or_else(|| {
            Error::Parse(format!(
                "reply requested unknown function '{}'",
                call.function
            ))
        })?;
        capability.validate(&call.arguments)?;
        capability.execute(call.arguments.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoCapability;

    #[async_trait]
    impl Capability for EchoCapability {
        fn spec(&self) -> CapabilitySpec {
            CapabilitySpec {
                name: "echo".to_string(),
                description: "Echo the given text back".to_string(),
                parameters: vec![ParamSpec::required("text", "string", "Text to echo")],
            }
        }

        fn validate(&self, args: &Value) -> Result<()> {
            if args.get("text").map_or(false, Value::is_string) {
                Ok(())
            } else {
                Err(Error::capability("echo", "'text' must be a string"))
            }
        }

        async fn execute(&self, args: Value) -> Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    #[test]
    fn flavor_resolution_and_language() {
        assert_eq!(DataFlavor::resolve("MySQL").unwrap(), DataFlavor::Mysql);
        assert_eq!(DataFlavor::resolve("pg").unwrap(), DataFlavor::Postgres);
        assert_eq!(DataFlavor::resolve("csv").unwrap().language(), "python");
        assert!(DataFlavor::resolve("oracle").is_err());
    }

    #[test]
    fn invocation_is_found_inside_prose() {
        let reply = r#"I will run the query now.
{"function": "run_query", "arguments": {"code": "SELECT 1", "data_name": "probe"}}
Waiting for results."#;

        let call = parse_invocation(reply).unwrap();
        assert_eq!(call.function, "run_query");
        assert_eq!(call.arguments["data_name"], "probe");
    }

    #[test]
    fn plain_replies_are_not_invocations() {
        assert!(parse_invocation("All done. TERMINATE").is_none());
        // JSON without a function field is data, not a call.
        assert!(parse_invocation(r#"{"name": "A", "description": "x"}"#).is_none());
    }

    #[test]
    fn single_quoted_invocation_still_parses() {
        let reply = "{'function': 'echo', 'arguments': {'text': 'hi'}}";
        let call = parse_invocation(reply).unwrap();
        assert_eq!(call.function, "echo");
    }

    #[tokio::test]
    async fn registry_dispatches_and_validates() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(EchoCapability)).unwrap();

        let call = FunctionCall {
            function: "echo".to_string(),
            arguments: json!({"text": "ping"}),
        };
        assert_eq!(registry.dispatch(&call).await.unwrap(), "ping");

        let bad = FunctionCall {
            function: "echo".to_string(),
            arguments: json!({}),
        };
        assert!(matches!(
            registry.dispatch(&bad).await.unwrap_err(),
            Error::Capability { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_function_is_a_parse_failure() {
        let registry = CapabilityRegistry::new();
        let call = FunctionCall {
            function: "missing".to_string(),
            arguments: json!({}),
        };
        assert!(matches!(
            registry.dispatch(&call).await.unwrap_err(),
            Error::Parse(_)
        ));
    }

    #[test]
    fn duplicate_registration_fails_fast() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(EchoCapability)).unwrap();
        assert!(matches!(
            registry.register(Arc::new(EchoCapability)).unwrap_err(),
            Error::Configuration(_)
        ));
    }

    #[test]
    fn coverage_check_names_the_gap() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(EchoCapability)).unwrap();

        registry.ensure_covers(&["echo"]).unwrap();
        let err = registry.ensure_covers(&["echo", "render_chart"]).unwrap_err();
        assert!(err.to_string().contains("render_chart"));
    }

    #[test]
    fn description_lists_parameters_and_protocol() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(EchoCapability)).unwrap();

        let description = registry.description();
        assert!(description.contains("echo"));
        assert!(description.contains("text"));
        assert!(description.contains("\"function\""));
    }
}
