//! Shared test doubles: a scripted completion client and recording
//! collaborators for the chart store and code runner.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chartmind::capability::{ChartService, ChartSpec, CodeRunner, RunOutput};
use chartmind::core::llm::{ChatCompletion, ChatMessage, Completion, CompletionConfig};
use chartmind::error::{CompletionError, Error, Result};
use tokio::sync::Mutex;

/// Replays a fixed reply sequence; every completion call pops the front.
/// An exhausted script fails as a malformed response, which is retryable,
/// so tests over-running their script fail loudly via retry exhaustion.
pub struct ScriptedClient {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn remaining(&self) -> usize {
        self.replies.lock().await.len()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedClient {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _config: &CompletionConfig,
    ) -> std::result::Result<Completion, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .replies
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| CompletionError::Malformed("script exhausted".to_string()))?;
        Ok(Completion { text, cost: 0.0 })
    }
}

/// Returns the same output for every query.
pub struct StubRunner {
    pub logs: String,
}

impl StubRunner {
    pub fn with_logs(logs: &str) -> Arc<Self> {
        Arc::new(Self {
            logs: logs.to_string(),
        })
    }
}

#[async_trait]
impl CodeRunner for StubRunner {
    async fn run(&self, _code: &str, _language: &str, _timeout: Duration) -> Result<RunOutput> {
        Ok(RunOutput {
            exit_code: 0,
            logs: self.logs.clone(),
        })
    }

    async fn describe_schema(&self) -> Result<String> {
        Ok("orders(id INTEGER, region TEXT, total REAL)".to_string())
    }
}

/// Chart store recording every render and delete.
#[derive(Default)]
pub struct RecordingChartStore {
    pub existing: std::sync::Mutex<Vec<String>>,
    pub rendered: std::sync::Mutex<Vec<(String, usize)>>,
    pub deleted: std::sync::Mutex<Vec<String>>,
    pub fail_listing: bool,
}

impl RecordingChartStore {
    pub fn with_existing(names: &[&str]) -> Arc<Self> {
        let store = Self::default();
        *store.existing.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
        Arc::new(store)
    }
}

#[async_trait]
impl ChartService for RecordingChartStore {
    async fn render(&self, charts: &[ChartSpec], name: &str) -> Result<String> {
        self.rendered
            .lock()
            .unwrap()
            .push((name.to_string(), charts.len()));
        Ok(format!("rendered {} chart(s) for '{name}'", charts.len()))
    }

    async fn delete(&self, names: &[String]) -> Result<String> {
        self.deleted.lock().unwrap().extend_from_slice(names);
        Ok(format!("Successfully deleted: {}", names.join(", ")))
    }

    async fn existing(&self) -> Result<Vec<String>> {
        if self.fail_listing {
            return Err(Error::capability("list_charts", "store offline"));
        }
        Ok(self.existing.lock().unwrap().clone())
    }
}
