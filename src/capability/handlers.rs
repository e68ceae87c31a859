//! Concrete capabilities: query execution and chart lifecycle
//!
//! These adapt the `CodeRunner` and `ChartService` collaborators to the
//! function-call protocol agents speak. Chart configurations are validated
//! structurally before they reach the service, so a presenter that invents
//! a series type or a two-x mapping gets a correctable error back instead
//! of corrupting the chart store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Capability, CapabilitySpec, ChartService, CodeRunner, DataFlavor, ParamSpec};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesType {
    Line,
    Column,
    Area,
    Pie,
    Scanner,
    Bubble,
    Heatmap,
    Box,
    Table,
}

/// Column-to-axis assignment. Tables carry an empty string instead of a
/// mapping object, so both shapes must deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnMapping {
    Mapping(BTreeMap<String, String>),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub name: String,
    #[serde(rename = "globalSeriesType")]
    pub series_type: SeriesType,
    #[serde(rename = "columnMapping")]
    pub column_mapping: ColumnMapping,
}

impl ChartSpec {
    /// Structural validation of the axis mapping.
    ///
    /// Tables take no mapping at all; every other series type needs a
    /// mapping with at most one "x" column and at least one "y" column,
    /// and nothing assigned to any other axis.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(Error::capability("render_chart", reason));

        if self.name.trim().is_empty() {
            return fail("chart name must not be empty".to_string());
        }

        match (&self.series_type, &self.column_mapping) {
            (SeriesType::Table, ColumnMapping::Raw(raw)) if raw.is_empty() => Ok(()),
            (SeriesType::Table, ColumnMapping::Mapping(map)) if map.is_empty() => Ok(()),
            (SeriesType::Table, _) => fail(format!(
                "table chart '{}' must carry an empty columnMapping",
                self.name
            )),
            (_, ColumnMapping::Raw(_)) => fail(format!(
                "chart '{}' needs a columnMapping object",
                self.name
            )),
            (_, ColumnMapping::Mapping(map)) => {
                let mut x = 0usize;
                let mut y = 0usize;
                for (column, axis) in map {
                    match axis.as_str() {
                        "x" => x += 1,
                        "y" => y += 1,
                        other => {
                            return fail(format!(
                                "chart '{}' maps column '{column}' to unknown axis '{other}'",
                                self.name
                            ))
                        }
                    }
                }
                if x > 1 {
                    return fail(format!("chart '{}' maps {x} columns to x", self.name));
                }
                if y == 0 {
                    return fail(format!("chart '{}' maps no column to y", self.name));
                }
                Ok(())
            }
        }
    }
}

/// Runs engineer-generated code through the configured runner.
pub struct RunQueryCapability {
    runner: Arc<dyn CodeRunner>,
    flavor: DataFlavor,
    timeout: Duration,
}

impl RunQueryCapability {
    pub fn new(runner: Arc<dyn CodeRunner>, flavor: DataFlavor, timeout: Duration) -> Self {
        Self {
            runner,
            flavor,
            timeout,
        }
    }
}

#[async_trait]
impl Capability for RunQueryCapability {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec {
            name: "run_query".to_string(),
            description: "Execute a query or script against the data source and return its output"
                .to_string(),
            parameters: vec![
                ParamSpec::required("code", "string", "The query or script to execute"),
                ParamSpec::required("data_name", "string", "Label for the data being fetched"),
            ],
        }
    }

    fn validate(&self, args: &Value) -> Result<()> {
        if !args.get("code").map_or(false, Value::is_string) {
            return Err(Error::capability("run_query", "'code' must be a string"));
        }
        if !args.get("data_name").map_or(false, Value::is_string) {
            return Err(Error::capability("run_query", "'data_name' must be a string"));
        }
        Ok(())
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let code = args["code"].as_str().unwrap_or_default();
        let data_name = args["data_name"].as_str().unwrap_or_default();
        tracing::info!("[run_query] executing for '{data_name}'");

        let output = self
            .runner
            .run(code, self.flavor.language(), self.timeout)
            .await?;
        let verdict = if output.exit_code == 0 {
            "execution succeeded"
        } else {
            "execution failed"
        };
        Ok(format!(
            "exitcode: {} ({verdict})\nCode output: {}",
            output.exit_code, output.logs
        ))
    }
}

/// Validates chart configurations and hands them to the chart service.
pub struct RenderChartCapability {
    charts: Arc<dyn ChartService>,
}

impl RenderChartCapability {
    pub fn new(charts: Arc<dyn ChartService>) -> Self {
        Self { charts }
    }
}

#[async_trait]
impl Capability for RenderChartCapability {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec {
            name: "render_chart".to_string(),
            description: "Render one or more chart configurations under a report name"
                .to_string(),
            parameters: vec![
                ParamSpec::required(
                    "charts",
                    "array",
                    "Chart objects: name, globalSeriesType, columnMapping",
                ),
                ParamSpec::required("name", "string", "Report name the charts belong to"),
            ],
        }
    }

    fn validate(&self, args: &Value) -> Result<()> {
        if !args.get("name").map_or(false, Value::is_string) {
            return Err(Error::capability("render_chart", "'name' must be a string"));
        }
        let charts: Vec<ChartSpec> =
            serde_json::from_value(args.get("charts").cloned().unwrap_or(Value::Null)).map_err(
                |e| Error::capability("render_chart", format!("'charts' is malformed: {e}")),
            )?;
        if charts.is_empty() {
            return Err(Error::capability("render_chart", "'charts' must not be empty"));
        }
        for chart in &charts {
            chart.validate()?;
        }
        Ok(())
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let name = args["name"].as_str().unwrap_or_default().to_string();
        let charts: Vec<ChartSpec> = serde_json::from_value(args["charts"].clone())
            .map_err(|e| Error::capability("render_chart", e.to_string()))?;
        tracing::info!("[render_chart] rendering {} chart(s) for '{name}'", charts.len());
        self.charts.render(&charts, &name).await
    }
}

/// Deletes charts by exact name.
pub struct DeleteChartCapability {
    charts: Arc<dyn ChartService>,
}

impl DeleteChartCapability {
    pub fn new(charts: Arc<dyn ChartService>) -> Self {
        Self { charts }
    }
}

#[async_trait]
impl Capability for DeleteChartCapability {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec {
            name: "delete_chart".to_string(),
            description: "Delete existing charts by their exact names".to_string(),
            parameters: vec![ParamSpec::required(
                "names",
                "array",
                "Exact names of the charts to delete",
            )],
        }
    }

    fn validate(&self, args: &Value) -> Result<()> {
        match args.get("names") {
            Some(Value::Array(items))
                if !items.is_empty() && items.iter().all(Value::is_string) =>
            {
                Ok(())
            }
            _ => Err(Error::capability(
                "delete_chart",
                "'names' must be a non-empty array of strings",
            )),
        }
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let names: Vec<String> = serde_json::from_value(args["names"].clone())
            .map_err(|e| Error::capability("delete_chart", e.to_string()))?;
        tracing::info!("[delete_chart] deleting {:?}", names);
        self.charts.delete(&names).await
    }
}
