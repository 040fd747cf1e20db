/// EAS Knowledge Bot Library
/// 
/// This library provides the core functionality for a Telegram question-answering
/// bot backed by a PAI-EAS hosted language model, including configuration,
/// corpus ingestion, the pluggable knowledge stores, RAG orchestration,
/// handlers, bot setup and the command line flow.

pub mod bot;
pub mod cli;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod handlers;
pub mod inference;
pub mod ingest;
pub mod rag;
pub mod store;

pub use error::{BotError, Result};
