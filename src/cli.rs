/// Command line flow
///
/// Parses the flags, loads the configuration and runs the requested one-shot
/// operations (upload, then query) before handing over to the Telegram bot
/// when a token is configured. Everything with side effects goes through a
/// `Launcher`, so the flow can run against in-process collaborators.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bot;
use crate::config::Config;
use crate::rag::RAGSystem;

#[derive(Parser, Debug, Clone)]
#[command(name = "eas_knowledge_bot", about = "RAG question-answering bot for PAI-EAS hosted LLMs")]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Load the document corpus into the knowledge store
    #[arg(long)]
    pub upload: bool,

    /// Answer a single query and print the result
    #[arg(long)]
    pub query: Option<String>,
}

impl Cli {
    fn has_operation(&self) -> bool {
        self.upload || self.query.is_some()
    }
}

/// Side effects of a run: loading config, connecting the knowledge store and
/// gateway, serving the chat front end
#[async_trait]
pub trait Launcher: Send + Sync {
    fn load_config(&self, path: &Path) -> crate::Result<Config> {
        Config::from_file(path)
    }

    async fn connect(&self, config: Config) -> crate::Result<Arc<RAGSystem>>;

    async fn serve(&self, token: &str, rag_system: Arc<RAGSystem>) -> Result<()>;
}

/// Real collaborators: remote stores, the EAS gateway and Telegram
pub struct TelegramLauncher;

#[async_trait]
impl Launcher for TelegramLauncher {
    async fn connect(&self, config: Config) -> crate::Result<Arc<RAGSystem>> {
        Ok(Arc::new(RAGSystem::new(config).await?))
    }

    async fn serve(&self, token: &str, rag_system: Arc<RAGSystem>) -> Result<()> {
        bot::run_bot(token, rag_system).await
    }
}

/// Run the command line flow, printing user-facing messages to `out`
pub async fn run(cli: &Cli, launcher: &dyn Launcher, out: &mut (dyn Write + Send)) -> Result<()> {
    if !cli.has_operation() {
        writeln!(out, "Not any operation is set.")?;
    }

    if !cli.config.exists() {
        if cli.has_operation() {
            writeln!(out, "{} does not exist.", cli.config.display())?;
        }
        return Ok(());
    }

    let cfg = launcher
        .load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    if !cli.has_operation() && cfg.telegram_token.is_none() {
        return Ok(());
    }

    log::info!("Using {} knowledge store", cfg.backend.name());
    let token = cfg.telegram_token.clone();

    let rag_system = launcher
        .connect(cfg)
        .await
        .context("Failed to initialize the RAG system")?;

    if cli.upload {
        rag_system
            .upload_custom_knowledge()
            .await
            .context("Failed to upload custom knowledge")?;
    }

    if let Some(query) = &cli.query {
        let answer = rag_system.query(query).await.context("Query failed")?;
        writeln!(out, "The answer is: {}", answer)?;
    }

    // Run the bot
    if let Some(token) = &token {
        launcher.serve(token, rag_system).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from(["eas_knowledge_bot", "--upload", "--query", "hi"]);
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert!(cli.upload);
        assert_eq!(cli.query.as_deref(), Some("hi"));
        assert!(cli.has_operation());
    }

    #[test]
    fn no_flags_means_no_operation() {
        let cli = Cli::parse_from(["eas_knowledge_bot", "--config", "other.json"]);
        assert_eq!(cli.config, PathBuf::from("other.json"));
        assert!(!cli.has_operation());
    }
}
