use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chartmind")]
#[command(author, version, about = "Multi-agent BI assistant: reports, analysis and chart management", long_about = None)]
pub struct Cli {
    /// Database flavor the engineer writes for: mysql, pg or csv
    #[arg(long, default_value = "mysql", global = true)]
    pub database: String,

    /// Answer language: english or chinese
    #[arg(long, default_value = "english", global = true)]
    pub locale: String,

    /// SQLite file backing the demo query runner (in-memory when omitted)
    #[arg(long, global = true)]
    pub sqlite: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify a question and run the matching task
    Ask { question: String },

    /// Generate a report for the request
    Report { question: String },

    /// Answer a question from the data
    Analyze { question: String },

    /// Delete the charts the request refers to
    Delete { question: String },

    /// Verify the configured OpenAI API key
    CheckKey,
}
