use anyhow::Result;
use chartmind::cli::{Cli, Commands};
use chartmind::{utils, Assistant, ChatMode, Settings};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut settings = Settings::new()?;
    settings.data.database = cli.database.clone();
    settings.data.language = cli.locale.clone();
    if cli.sqlite.is_some() {
        settings.data.sqlite_path = cli.sqlite.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone())),
        )
        .init();

    // Key verification must answer even when no key is configured; every
    // other command needs the key to build the client at all.
    if matches!(cli.command, Commands::CheckKey) && Settings::api_key().is_err() {
        let locale = chartmind::Locale::resolve(&settings.data.language)?;
        utils::print_error(locale.strings().key_not_saved);
        return Ok(());
    }

    let mode = match cli.command {
        Commands::Report { .. } => ChatMode::Report,
        _ => ChatMode::Chat,
    };
    let assistant = Assistant::from_settings(settings, mode).await?;

    match cli.command {
        Commands::Ask { question } => {
            utils::print_info("Classifying and answering...");
            utils::print_answer(&assistant.dispatch(&question).await);
        }
        Commands::Report { question } => {
            utils::print_header("Report");
            utils::print_answer(&assistant.generate_report(&question).await);
        }
        Commands::Analyze { question } => {
            utils::print_header("Analysis");
            utils::print_answer(&assistant.analyze_data(&question).await);
        }
        Commands::Delete { question } => {
            utils::print_answer(&assistant.delete_chart(&question).await);
        }
        Commands::CheckKey => {
            utils::print_answer(&assistant.check_api_key().await);
        }
    }

    Ok(())
}
