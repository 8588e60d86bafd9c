//! Command-line interface.
//!
//! Each command builds only the collaborators it needs, so reading stored
//! conversations works without OpenAI or GitHub credentials.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::conversation::{ConversationManager, ConversationOrchestrator};
use crate::error::AppResult;
use crate::llm::OpenAiClient;
use crate::model::ModelManager;
use crate::pipeline::{IssuePipeline, PipelineOutcome, WebhookEvent};
use crate::storage::SqliteStorage;
use crate::vcs::{GitHubClient, StaticTokenProvider, TokenProvider, VcsHost};

/// Turns GitHub issues into pull requests using a stored C4 model.
#[derive(Parser, Debug)]
#[command(name = "issue-assistant", version, about)]
pub struct Cli {
    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Register a repository (if new) and store its model from a notation file
    InitRepo {
        /// Repository full name, `owner/name`
        #[arg(long)]
        repo: String,

        /// Repository URL
        #[arg(long)]
        url: String,

        /// Path to the notation file
        #[arg(long)]
        notation: PathBuf,
    },

    /// Print the stored model of a repository as notation
    Export {
        /// Repository full name, `owner/name`
        #[arg(long)]
        repo: String,
    },

    /// List all conversations
    Conversations,

    /// List the messages of one conversation
    Messages {
        /// Conversation id
        #[arg(long)]
        conversation: String,
    },

    /// Handle an `issues` or `issue_comment` webhook payload
    HandleEvent {
        /// Path to the JSON payload
        #[arg(long)]
        payload: PathBuf,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

impl From<AppResult<String>> for CliResult {
    fn from(result: AppResult<String>) -> Self {
        match result {
            Ok(message) => CliResult::success(message),
            Err(e) => CliResult::error(format!("Error: {}", e)),
        }
    }
}

/// Execute a CLI command.
pub async fn execute_command(command: Commands, config: &Config, storage: SqliteStorage) -> CliResult {
    let result = match command {
        Commands::InitRepo {
            repo,
            url,
            notation,
        } => execute_init_repo(storage, &repo, &url, &notation).await,
        Commands::Export { repo } => ModelManager::new(storage).export_notation(&repo).await,
        Commands::Conversations => execute_conversations(storage).await,
        Commands::Messages { conversation } => execute_messages(storage, &conversation).await,
        Commands::HandleEvent { payload } => execute_handle_event(config, storage, &payload).await,
    };
    result.into()
}

async fn execute_init_repo(
    storage: SqliteStorage,
    repo: &str,
    url: &str,
    notation: &Path,
) -> AppResult<String> {
    let text = tokio::fs::read_to_string(notation).await?;
    let summary = ModelManager::new(storage)
        .initialize_repo(repo, url, &text)
        .await?;
    Ok(format!(
        "Initialized {}: workspace {} with {} elements and {} relationships",
        repo, summary.workspace_id, summary.elements, summary.relationships
    ))
}

async fn execute_conversations(storage: SqliteStorage) -> AppResult<String> {
    let conversations = ConversationManager::new(storage).list_conversations().await?;
    if conversations.is_empty() {
        return Ok("No conversations".to_string());
    }

    let lines: Vec<String> = conversations
        .iter()
        .map(|c| {
            format!(
                "{}  repo={}  issue=#{}  status={}  created={}",
                c.id,
                c.repo_id,
                c.issue_number,
                c.status,
                c.created_at.to_rfc3339()
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

async fn execute_messages(storage: SqliteStorage, conversation_id: &str) -> AppResult<String> {
    let messages = ConversationManager::new(storage)
        .list_messages(conversation_id)
        .await?;

    let blocks: Vec<String> = messages
        .iter()
        .map(|m| format!("[{}] {}\n{}", m.role, m.created_at.to_rfc3339(), m.content))
        .collect();
    Ok(blocks.join("\n\n"))
}

async fn execute_handle_event(
    config: &Config,
    storage: SqliteStorage,
    payload: &Path,
) -> AppResult<String> {
    let text = tokio::fs::read_to_string(payload).await?;
    let event: WebhookEvent = serde_json::from_str(&text)?;

    let pipeline = build_pipeline(config, storage)?;
    let outcome = pipeline.handle_event(&event).await?;
    Ok(match outcome {
        PipelineOutcome::PullRequestOpened(pr) => {
            format!("Opened pull request #{}: {}", pr.number, pr.html_url)
        }
        PipelineOutcome::Commented => format!("Commented on issue #{}", event.issue.number),
        PipelineOutcome::Ignored { reason } => format!("Ignored: {}", reason),
    })
}

/// Assemble the pipeline from configuration.
pub fn build_pipeline(config: &Config, storage: SqliteStorage) -> AppResult<IssuePipeline> {
    let token = config.github.require_installation_token()?;
    let tokens: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new(token));
    let vcs: Arc<dyn VcsHost> = Arc::new(GitHubClient::new(
        &config.github,
        &config.request,
        tokens.clone(),
    )?);
    let llm = Arc::new(OpenAiClient::new(&config.openai, &config.request)?);

    let conversations = ConversationManager::new(storage.clone());
    let orchestrator = ConversationOrchestrator::new(
        conversations.clone(),
        ModelManager::new(storage),
        llm,
        vcs.clone(),
        config.openai.model.clone(),
        config.github.base_branch.clone(),
    );

    Ok(IssuePipeline::new(
        orchestrator,
        conversations,
        vcs,
        tokens,
        config.github.base_branch.clone(),
        config.github.bot_login.clone(),
    ))
}
