//! Chartmind - multi-agent conversation orchestration for a BI assistant
//!
//! LLM agent teams plan, fetch and present data: a question comes in, gets
//! classified, and is answered by report-generation, data-analysis or
//! chart-management conversations whose every failure maps to a fixed
//! user-facing message in the session's language.

pub mod agents;
pub mod api;
pub mod capability;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod locale;
pub mod orchestrator;
pub mod session;
pub mod storage;
pub mod utils;

pub use api::Assistant;
pub use config::Settings;
pub use error::{Error, Result};
pub use locale::Locale;
pub use orchestrator::{ChatMode, TaskOrchestrator};
