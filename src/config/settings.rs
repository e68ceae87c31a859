//! Layered configuration
//!
//! Settings come from `config/{CONFIG_ENV}.toml` with `APP__`-prefixed
//! environment overrides on top. Every field carries a serde default so a
//! bare environment still produces a working configuration; only the API
//! key has no default and is read from `OPENAI_API_KEY`.

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub orchestrator: OrchestratorSettings,
    pub session: SessionSettings,
    pub data: DataSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4-1106-preview".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
            request_timeout_secs: 120,
            input_cost_per_1k: 0.01,
            output_cost_per_1k: 0.03,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Attempts per bounded-retry block before the timeout message wins.
    pub max_retry_times: usize,
    /// Speaking rounds per group chat.
    pub max_round: usize,
    /// Function hops one speaking turn may chain before it is abandoned.
    pub max_function_hops: usize,
    /// Trim ceiling for report synthesis context.
    pub report_token_ceiling: usize,
    /// Trim ceiling for analysis synthesis context.
    pub analysis_token_ceiling: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_retry_times: 3,
            max_round: 10,
            max_function_hops: 10,
            report_token_ceiling: 20_000,
            analysis_token_ceiling: 7_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Wall-clock bound on verification conversations (annotation check,
    /// API-key probe).
    pub check_timeout_secs: u64,
    /// Largest annotation payload accepted for checking, in tokens.
    pub annotation_token_ceiling: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            check_timeout_secs: 120,
            annotation_token_ceiling: 16_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Database flavor: mysql, pg or csv.
    pub database: String,
    /// Answer language: english or chinese.
    pub language: String,
    /// SQLite file backing the demo query runner; in-memory when unset.
    pub sqlite_path: Option<String>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            database: "mysql".to_string(),
            language: "english".to_string(),
            sqlite_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn api_key() -> Result<String> {
        env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let settings = Settings::default();
        assert_eq!(settings.orchestrator.max_retry_times, 3);
        assert_eq!(settings.orchestrator.report_token_ceiling, 20_000);
        assert_eq!(settings.orchestrator.analysis_token_ceiling, 7_000);
        assert_eq!(settings.session.check_timeout_secs, 120);
        assert_eq!(settings.data.database, "mysql");
        assert!(settings.data.sqlite_path.is_none());
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let parsed: Settings =
            serde_json::from_str(r#"{"orchestrator": {"max_retry_times": 5}}"#).unwrap();
        assert_eq!(parsed.orchestrator.max_retry_times, 5);
        assert_eq!(parsed.orchestrator.max_round, 10);
        assert_eq!(parsed.llm.model, "gpt-4-1106-preview");
    }
}
