use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Notation error: {0}")]
    Notation(#[from] NotationError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("VCS error: {0}")]
    Vcs(#[from] VcsError),

    #[error("Change rejected: {0}")]
    Change(#[from] ChangeError),

    /// A conversation step failed after the conversation was marked FAILED.
    #[error("Conversation {conversation_id} failed {stage}: {source}")]
    ConversationFailed {
        conversation_id: String,
        stage: &'static str,
        #[source]
        source: Box<AppError>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// True when the error, or the step failure it wraps, is a missing entity.
    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::Storage(StorageError::NotFound { .. }) => true,
            AppError::ConversationFailed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True when the error is a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Storage(StorageError::Conflict { .. }))
    }
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("{operation} affected {actual} rows, expected {expected}")]
    RowCountMismatch {
        operation: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("Conversation {conversation_id} cannot move from {from} to {to}")]
    InvalidTransition {
        conversation_id: String,
        from: String,
        to: String,
    },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl StorageError {
    /// Map a sqlx error, turning unique-constraint violations into conflicts.
    pub fn from_write(err: sqlx::Error, message: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict {
                message: message.into(),
            },
            _ => StorageError::Sqlx(err),
        }
    }
}

/// Notation parse errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotationError {
    #[error("Parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },
}

/// LLM client errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Model refused the request: {message}")]
    Refused { message: String },

    #[error("Prompt or completion too long: {message}")]
    TooLong { message: String },

    #[error("Malformed model output: {message}")]
    MalformedOutput { message: String },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Version control errors, covering the GitHub API and local git operations
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Credential error: {message}")]
    Credential { message: String },

    #[error("Push of {reference} rejected: {message}")]
    PushRejected { reference: String, message: String },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A file change that does not agree with the working copy
#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("Cannot {change} '{path}' as it does not exist")]
    FileMissing { path: String, change: &'static str },

    #[error("Cannot create '{path}' as it already exists")]
    AlreadyExists { path: String },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("Failed to write '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for notation parsing
pub type NotationResult<T> = Result<T, NotationError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for VCS operations
pub type VcsResult<T> = Result<T, VcsError>;

/// Result type alias for change application
pub type ChangeResult<T> = Result<T, ChangeError>;
