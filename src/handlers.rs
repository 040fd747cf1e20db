/// Message handlers module
///
/// This module handles:
/// - The informational /start and /help commands
/// - Forwarding text messages to the RAG system
/// - Extracting the `response` field from the gateway's answer

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{MessageEntity, MessageEntityKind};

use crate::error::BotError;
use crate::rag::RAGSystem;

pub const START_MESSAGE: &str = "Hello! I am your language model bot. Send me a query!";

pub const HELP_MESSAGE: &str =
    "This is a language model bot. Send me a query, and I will respond with relevant information.";

/// Reply used when the gateway's answer has no usable `response` field
pub const UNPARSEABLE_MESSAGE: &str = "Unable to parse the response.";

const ERROR_MESSAGE: &str =
    "Sorry, I encountered an error while processing your request. Please try again.";

/// Extract the `response` field from a raw gateway answer
///
/// String values are returned as is; any other JSON value is rendered as
/// JSON text.
pub fn parse_answer(raw: &str) -> std::result::Result<String, BotError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| BotError::AnswerUnparseable(e.to_string()))?;

    match value.get("response") {
        Some(serde_json::Value::String(text)) => Ok(text.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(BotError::AnswerUnparseable("no `response` field".into())),
    }
}

/// Text to send back for a raw answer; never fails
pub fn answer_text(raw: &str) -> String {
    parse_answer(raw).unwrap_or_else(|e| {
        log::warn!("{}", e);
        UNPARSEABLE_MESSAGE.to_string()
    })
}

/// Whether a text message is a question for the RAG system rather than a
/// bot command, known or not
pub fn is_query_text(text: &str, entities: &[MessageEntity]) -> bool {
    let starts_with_command = entities
        .iter()
        .any(|e| e.kind == MessageEntityKind::BotCommand && e.offset == 0);
    !starts_with_command && !text.starts_with('/')
}

/// Main message handler
///
/// Forwards the message text verbatim to the RAG system and replies with the
/// extracted answer.
pub async fn handle_message(bot: Bot, msg: Message, rag_system: Arc<RAGSystem>) -> Result<()> {
    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()), // Ignore non-text messages
    };

    log::info!("Received query from chat {}: {}", msg.chat.id, text);

    // Send "typing" action to indicate bot is processing
    bot.send_chat_action(msg.chat.id, teloxide::types::ChatAction::Typing)
        .await?;

    let reply = match rag_system.query(text).await {
        Ok(raw) => answer_text(&raw),
        Err(e) => {
            log::error!("Error querying RAG system: {}", e);
            ERROR_MESSAGE.to_string()
        }
    };

    bot.send_message(msg.chat.id, reply).await?;

    Ok(())
}

/// Handle the /start command
pub async fn handle_start_command(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, START_MESSAGE).await?;
    Ok(())
}

/// Handle the /help command
pub async fn handle_help_command(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, HELP_MESSAGE).await?;
    Ok(())
}
