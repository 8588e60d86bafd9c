//! # C4 Issue Assistant
//!
//! Turns GitHub issues into pull requests. A repository's architecture is
//! stored as a C4 model, rendered into notation for the LLM, and the model's
//! answer is applied to a fresh clone and pushed as a pull request.
//!
//! ## Architecture
//!
//! ```text
//! webhook event → IssuePipeline → ConversationOrchestrator → OpenAI
//!                      ↓                  ↓
//!              git clone / push     SQLite (models, conversations)
//!                      ↓
//!               GitHub pull request
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use c4_issue_assistant::{model::ModelManager, storage::SqliteStorage, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let models = ModelManager::new(storage);
//!     models
//!         .initialize_repo("acme/shop", "https://github.com/acme/shop", "workspace { model { } }")
//!         .await?;
//!     println!("{}", models.export_notation("acme/shop").await?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Command-line interface.
pub mod cli;
/// Configuration loaded from the environment.
pub mod config;
/// Conversation persistence and the issue-to-plan protocol.
pub mod conversation;
/// Error types and result aliases for the application.
pub mod error;
/// LLM client, message types and response schemas.
pub mod llm;
/// Import and export of repository models.
pub mod model;
/// C4 notation parsing and rendering.
pub mod notation;
/// End-to-end issue and comment handling.
pub mod pipeline;
/// Prompt text for the model and GitHub comments.
pub mod prompts;
/// SQLite storage layer for persistence.
pub mod storage;
/// GitHub API, git working copies and change application.
pub mod vcs;

pub use config::Config;
pub use error::{AppError, AppResult};
