/// Telegram bot module
///
/// This module sets up and runs the Telegram bot using the teloxide framework.
/// It wires the command and message handlers to a shared RAG system.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use teloxide::{prelude::*, types::Me, utils::command::BotCommands};
use tokio::time::sleep;

use crate::handlers::{handle_help_command, handle_message, handle_start_command, is_query_text};
use crate::rag::RAGSystem;

/// Bot commands that users can use
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "Start the bot and see welcome message")]
    Start,
    #[command(description = "Show help information")]
    Help,
}

/// Run the Telegram bot until Ctrl+C
pub async fn run_bot(token: &str, rag_system: Arc<RAGSystem>) -> Result<()> {
    log::info!("Initializing bot...");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;
    let bot = Bot::with_client(token, client);

    // Get bot info with retry logic for network issues
    let me = retry_get_me(&bot)
        .await
        .context("Failed to connect to Telegram API after multiple retries")?;
    log::info!("Bot started: @{}", me.username());

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    let handler = dptree::entry()
        // Handle commands
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(|bot: Bot, msg: Message, cmd: Command| async move {
                    match cmd {
                        Command::Start => handle_start_command(bot, msg).await,
                        Command::Help => handle_help_command(bot, msg).await,
                    }
                }),
        )
        // Handle regular text messages; unknown commands fall through to the default handler
        .branch(
            Update::filter_message()
                .filter(|msg: Message| {
                    msg.text()
                        .map(|text| is_query_text(text, msg.entities().unwrap_or_default()))
                        .unwrap_or(false)
                })
                .endpoint(|bot: Bot, msg: Message, rag_system: Arc<RAGSystem>| async move {
                    if let Err(e) = handle_message(bot, msg, rag_system).await {
                        log::error!("Error handling message: {:?}", e);
                    }
                    Ok(())
                }),
        );

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![rag_system])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build();

    log::info!("Bot is running. Press Ctrl+C to stop.");
    dispatcher.dispatch().await;

    Ok(())
}

/// Retry getting bot info with exponential backoff
async fn retry_get_me(bot: &Bot) -> Result<Me> {
    let max_retries = 5;
    let mut delay = Duration::from_secs(2);

    log::info!("Attempting to connect to Telegram API...");

    for attempt in 1..=max_retries {
        match bot.get_me().await {
            Ok(me) => {
                log::info!("Successfully connected to Telegram API on attempt {}", attempt);
                return Ok(me);
            }
            Err(e) if attempt == max_retries => {
                anyhow::bail!(
                    "Failed to connect to Telegram API after {} attempts: {}",
                    max_retries,
                    e
                );
            }
            Err(e) => {
                log::warn!(
                    "Failed to connect to Telegram API (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    max_retries,
                    e,
                    delay
                );
                sleep(delay).await;
                delay *= 2; // Exponential backoff
            }
        }
    }

    unreachable!()
}
