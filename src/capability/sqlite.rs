//! Local collaborators: SQLite query runner and in-process chart store
//!
//! `SqliteRunner` executes engineer-generated SQL against a bundled SQLite
//! database, standing in for a production warehouse connection. Statement
//! failures come back as a non-zero exit code with the error in the logs,
//! not as `Err` — the conversation is expected to read the output and
//! correct the code. `LocalChartStore` keeps rendered chart configurations
//! in memory, keyed by chart name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio::task;

use super::{ChartService, ChartSpec, CodeRunner, RunOutput};
use crate::error::{Error, Result};

pub struct SqliteRunner {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRunner {
    /// Open the database at `path`, or an in-memory one when `path` is
    /// `None`.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| Error::Configuration(format!("cannot open sqlite database: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn query_blocking(conn: &Connection, sql: &str) -> rusqlite::Result<String> {
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut out: Vec<Value> = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Map::new();
            for (idx, column) in columns.iter().enumerate() {
                let value = match row.get_ref(idx)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(i) => Value::from(i),
                    ValueRef::Real(f) => Value::from(f),
                    ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).to_string()),
                    ValueRef::Blob(b) => Value::from(format!("<{} byte blob>", b.len())),
                };
                object.insert(column.clone(), value);
            }
            out.push(Value::Object(object));
        }

        Ok(serde_json::to_string(&out).unwrap_or_default())
    }
}

#[async_trait]
impl CodeRunner for SqliteRunner {
    async fn run(&self, code: &str, language: &str, timeout: Duration) -> Result<RunOutput> {
        tracing::debug!("[SqliteRunner] running {} chars of {language}", code.len());
        let conn = self.conn.clone();
        let sql = code.to_string();

        let work = task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self::query_blocking(&conn, &sql)
        });

        let result = tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| Error::capability("run_query", format!("query exceeded {timeout:?}")))?
            .map_err(|e| Error::capability("run_query", format!("query task failed: {e}")))?;

        Ok(match result {
            Ok(logs) => RunOutput { exit_code: 0, logs },
            Err(e) => RunOutput {
                exit_code: 1,
                logs: e.to_string(),
            },
        })
    }

    async fn describe_schema(&self) -> Result<String> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .map_err(|e| Error::capability("describe_schema", e.to_string()))?;
            let tables: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .and_then(|rows| rows.collect())
                .map_err(|e| Error::capability("describe_schema", e.to_string()))?;

            let mut out = String::new();
            for table in tables {
                let mut stmt = conn
                    .prepare(&format!("PRAGMA table_info('{table}')"))
                    .map_err(|e| Error::capability("describe_schema", e.to_string()))?;
                let columns: Vec<(String, String)> = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                    })
                    .and_then(|rows| rows.collect())
                    .map_err(|e| Error::capability("describe_schema", e.to_string()))?;

                let rendered: Vec<String> = columns
                    .into_iter()
                    .map(|(name, kind)| format!("{name} {kind}"))
                    .collect();
                out.push_str(&format!("{table}({})\n", rendered.join(", ")));
            }
            Ok(out)
        })
        .await
        .map_err(|e| Error::capability("describe_schema", format!("task failed: {e}")))?
    }
}

/// Chart name → (report name, configuration). Rendering the same chart
/// name again replaces the previous configuration.
pub struct LocalChartStore {
    charts: Arc<RwLock<HashMap<String, (String, ChartSpec)>>>,
}

impl LocalChartStore {
    pub fn new() -> Self {
        Self {
            charts: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for LocalChartStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChartService for LocalChartStore {
    async fn render(&self, charts: &[ChartSpec], name: &str) -> Result<String> {
        let mut store = self.charts.write().await;
        for chart in charts {
            store.insert(chart.name.clone(), (name.to_string(), chart.clone()));
        }
        tracing::info!("[LocalChartStore] rendered {} chart(s) under '{name}'", charts.len());
        Ok(format!(
            "Successfully rendered {} chart(s) for '{name}'.",
            charts.len()
        ))
    }

    async fn delete(&self, names: &[String]) -> Result<String> {
        let mut store = self.charts.write().await;
        let mut deleted = Vec::new();
        for name in names {
            if store.remove(name).is_some() {
                deleted.push(name.clone());
            }
        }

        if deleted.is_empty() {
            return Err(Error::capability(
                "delete_chart",
                format!("none of {names:?} exists"),
            ));
        }
        tracing::info!("[LocalChartStore] deleted {:?}", deleted);
        Ok(format!("Successfully deleted: {}", deleted.join(", ")))
    }

    async fn existing(&self) -> Result<Vec<String>> {
        let store = self.charts.read().await;
        let mut names: Vec<String> = store.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ColumnMapping, SeriesType};
    use std::collections::BTreeMap;

    fn seeded_runner() -> SqliteRunner {
        let runner = SqliteRunner::open(None).unwrap();
        {
            let conn = runner.conn.lock().unwrap();
            conn.execute_batch(
                "CREATE TABLE orders (id INTEGER, region TEXT, total REAL);
                 INSERT INTO orders VALUES (1, 'EMEA', 91.5), (2, 'APAC', 40.0);",
            )
            .unwrap();
        }
        runner
    }

    #[tokio::test]
    async fn query_returns_rows_as_json() {
        let runner = seeded_runner();
        let output = runner
            .run(
                "SELECT region, total FROM orders ORDER BY id",
                "mysql",
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        let rows: Vec<Value> = serde_json::from_str(&output.logs).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["region"], "EMEA");
        assert_eq!(rows[1]["total"], 40.0);
    }

    #[tokio::test]
    async fn bad_sql_fails_with_logs_not_an_error() {
        let runner = seeded_runner();
        let output = runner
            .run("SELECT nope FROM nothing", "mysql", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 1);
        assert!(output.logs.contains("nothing"));
    }

    #[tokio::test]
    async fn file_backed_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.db");
        let path = path.to_str().unwrap();

        {
            let runner = SqliteRunner::open(Some(path)).unwrap();
            let conn = runner.conn.lock().unwrap();
            conn.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (7);")
                .unwrap();
        }

        let runner = SqliteRunner::open(Some(path)).unwrap();
        let output = runner
            .run("SELECT v FROM t", "mysql", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 0);
        assert!(output.logs.contains("7"));
    }

    #[tokio::test]
    async fn schema_description_lists_tables_and_columns() {
        let runner = seeded_runner();
        let schema = runner.describe_schema().await.unwrap();
        assert!(schema.contains("orders"));
        assert!(schema.contains("region TEXT"));
    }

    fn chart(name: &str) -> ChartSpec {
        let mut mapping = BTreeMap::new();
        mapping.insert("region".to_string(), "x".to_string());
        mapping.insert("total".to_string(), "y".to_string());
        ChartSpec {
            name: name.to_string(),
            series_type: SeriesType::Column,
            column_mapping: ColumnMapping::Mapping(mapping),
        }
    }

    #[tokio::test]
    async fn store_round_trips_render_list_delete() {
        let store = LocalChartStore::new();
        store
            .render(&[chart("Sales"), chart("Returns")], "Q1 report")
            .await
            .unwrap();

        assert_eq!(store.existing().await.unwrap(), vec!["Returns", "Sales"]);

        let message = store.delete(&["Sales".to_string()]).await.unwrap();
        assert!(message.contains("Sales"));
        assert_eq!(store.existing().await.unwrap(), vec!["Returns"]);
    }

    #[tokio::test]
    async fn deleting_nothing_that_exists_is_an_error() {
        let store = LocalChartStore::new();
        store.render(&[chart("Sales")], "Q1").await.unwrap();

        let err = store.delete(&["Ghost".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::Capability { .. }));
        // Partial matches still succeed.
        store
            .delete(&["Ghost".to_string(), "Sales".to_string()])
            .await
            .unwrap();
    }
}
