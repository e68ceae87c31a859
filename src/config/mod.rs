mod settings;

pub use settings::{
    DataSettings, LlmSettings, LoggingSettings, OrchestratorSettings, SessionSettings, Settings,
};
