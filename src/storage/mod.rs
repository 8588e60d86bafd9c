//! Storage layer for architecture models and issue conversations.
//!
//! Reads go straight to the pool through [`SqliteStorage`]. Every write goes
//! through a [`UnitOfWork`] so multi-row steps commit or roll back together.

mod sqlite;
mod unit_of_work;


pub use sqlite::SqliteStorage;
pub use unit_of_work::UnitOfWork;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::notation::ElementKind;

/// A GitHub repository known to the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Unique repository identifier.
    pub id: String,
    /// `owner/name` coordinate.
    pub full_name: String,
    /// Repository URL.
    pub url: String,
    /// Workspace currently describing the repository.
    pub workspace_id: Option<String>,
}

/// A named container for one architecture model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Unique workspace identifier.
    pub id: String,
    /// Workspace name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
}

/// A node of a workspace's element forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphElement {
    /// Unique element identifier.
    pub id: String,
    /// Enclosing element, always in the same workspace.
    pub parent_id: Option<String>,
    /// C4 kind.
    pub kind: ElementKind,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Owning workspace.
    pub workspace_id: String,
}

/// A directed edge between two elements of one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source element id.
    pub source_id: String,
    /// Destination element id.
    pub destination_id: String,
    /// Optional description.
    pub description: Option<String>,
    /// Owning workspace.
    pub workspace_id: String,
}

/// A relationship with its endpoint names resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRelationship {
    /// Source element id.
    pub source_id: String,
    /// Source element name.
    pub source_name: String,
    /// Destination element id.
    pub destination_id: String,
    /// Destination element name.
    pub destination_name: String,
    /// Optional description.
    pub description: Option<String>,
}

/// Lifecycle of an issue conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    /// The protocol is still running.
    #[default]
    InProgress,
    /// A pull request plan was produced.
    Completed,
    /// A step failed; terminal.
    Failed,
}

impl ConversationStatus {
    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConversationStatus::InProgress)
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationStatus::InProgress => write!(f, "IN_PROGRESS"),
            ConversationStatus::Completed => write!(f, "COMPLETED"),
            ConversationStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IN_PROGRESS" => Ok(ConversationStatus::InProgress),
            "COMPLETED" => Ok(ConversationStatus::Completed),
            "FAILED" => Ok(ConversationStatus::Failed),
            _ => Err(format!("Unknown conversation status: {}", s)),
        }
    }
}

/// The LLM conversation held for one repository issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: String,
    /// Repository the issue belongs to.
    pub repo_id: String,
    /// Issue number within the repository.
    pub issue_number: i64,
    /// Current status.
    pub status: ConversationStatus,
    /// When the conversation started.
    pub created_at: DateTime<Utc>,
}

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    /// Instructions for the model.
    System,
    /// Prompt content sent on behalf of the user.
    User,
    /// Model output.
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "SYSTEM"),
            MessageRole::User => write!(f, "USER"),
            MessageRole::Assistant => write!(f, "ASSISTANT"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SYSTEM" => Ok(MessageRole::System),
            "USER" => Ok(MessageRole::User),
            "ASSISTANT" => Ok(MessageRole::Assistant),
            _ => Err(format!("Unknown message role: {}", s)),
        }
    }
}

/// A persisted conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Unique message identifier.
    pub id: String,
    /// Author role.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
    /// Creation time; messages are listed in this order.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Constructors
// ============================================================================

impl Repository {
    /// Create an unlinked repository record.
    pub fn new(full_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            full_name: full_name.into(),
            url: url.into(),
            workspace_id: None,
        }
    }
}

impl Workspace {
    /// Create a workspace with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

impl Conversation {
    /// Start a conversation in [`ConversationStatus::InProgress`].
    pub fn new(repo_id: impl Into<String>, issue_number: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            repo_id: repo_id.into(),
            issue_number,
            status: ConversationStatus::InProgress,
            created_at: Utc::now(),
        }
    }
}

impl StoredMessage {
    /// Create a message stamped with the current time.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Fixed-width UTC timestamp, so text order matches time order.
pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp; a corrupt value is a query error.
pub(crate) fn parse_timestamp(text: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Query {
            message: format!("Invalid timestamp '{}': {}", text, e),
        })
}
