/// EAS Knowledge Bot
///
/// Command line entry point. Depending on the flags it uploads the document
/// corpus into the configured knowledge store, answers a single query, and
/// runs the Telegram bot whenever a bot token is configured.

use anyhow::Result;
use clap::Parser;
use eas_knowledge_bot::cli::{self, Cli, TelegramLauncher};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger, defaulting to info level
    pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();
    cli::run(&cli, &TelegramLauncher, &mut std::io::stdout()).await
}
