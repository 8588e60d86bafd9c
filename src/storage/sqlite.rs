use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::SqliteExecutor;
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    parse_timestamp, Conversation, GraphElement, Repository, ResolvedRelationship, StoredMessage,
    UnitOfWork, Workspace,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database, mainly for tests.
    ///
    /// The pool holds a single connection that is never recycled, since an
    /// in-memory database lives and dies with its connection.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a transaction; nothing it writes is visible until commit.
    pub async fn begin(&self) -> StorageResult<UnitOfWork> {
        let tx = self.pool.begin().await?;
        debug!("Unit of work started");
        Ok(UnitOfWork::new(tx))
    }

    // ========================================================================
    // Model reads
    // ========================================================================

    /// Look up a repository by its `owner/name` coordinate.
    pub async fn get_repository(&self, full_name: &str) -> StorageResult<Option<Repository>> {
        fetch_repository(&self.pool, full_name).await
    }

    /// Look up a repository by id.
    pub async fn get_repository_by_id(&self, id: &str) -> StorageResult<Option<Repository>> {
        let row: Option<RepositoryRow> = sqlx::query_as(
            r#"
            SELECT id, full_name, url, workspace_id
            FROM github_repository
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// The workspace linked to a repository, if both exist.
    pub async fn get_workspace_for_repo(&self, repo_name: &str) -> StorageResult<Option<Workspace>> {
        let row: Option<WorkspaceRow> = sqlx::query_as(
            r#"
            SELECT w.id, w.name, w.description
            FROM workspace w
            JOIN github_repository r ON r.workspace_id = w.id
            WHERE r.full_name = ?
            "#,
        )
        .bind(repo_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    /// All elements of a workspace in insertion order.
    pub async fn get_elements(&self, workspace_id: &str) -> StorageResult<Vec<GraphElement>> {
        let rows: Vec<ElementRow> = sqlx::query_as(
            r#"
            SELECT id, parent_id, element_type, name, description, workspace_id
            FROM element
            WHERE workspace_id = ?
            ORDER BY rowid
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// All relationships of a workspace, with endpoint names, in insertion order.
    pub async fn get_relationships(
        &self,
        workspace_id: &str,
    ) -> StorageResult<Vec<ResolvedRelationship>> {
        let rows: Vec<RelationshipRow> = sqlx::query_as(
            r#"
            SELECT r.start_element AS source_id, s.name AS source_name,
                   r.end_element AS destination_id, d.name AS destination_name,
                   r.description
            FROM relationship r
            JOIN element s ON s.id = r.start_element
            JOIN element d ON d.id = r.end_element
            WHERE r.workspace_id = ?
            ORDER BY r.id
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ========================================================================
    // Conversation reads
    // ========================================================================

    /// Look up a conversation by id.
    pub async fn get_conversation(&self, id: &str) -> StorageResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, repo_id, issue_number, status, created_at
            FROM conversation
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    /// The conversation held for an issue, if one was started.
    pub async fn find_conversation(
        &self,
        repo_id: &str,
        issue_number: i64,
    ) -> StorageResult<Option<Conversation>> {
        fetch_conversation_for_issue(&self.pool, repo_id, issue_number).await
    }

    /// All conversations, oldest first.
    pub async fn list_conversations(&self) -> StorageResult<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, repo_id, issue_number, status, created_at
            FROM conversation
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Messages of one conversation in creation order.
    pub async fn list_messages(&self, conversation_id: &str) -> StorageResult<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT m.id, m.role, m.content, m.created_at
            FROM message m
            JOIN conversation_message cm ON cm.message_id = m.id
            WHERE cm.conversation_id = ?
            ORDER BY m.created_at, cm.seq
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

// Queries shared by the pool and open transactions

pub(super) async fn fetch_repository<'e, E>(
    executor: E,
    full_name: &str,
) -> StorageResult<Option<Repository>>
where
    E: SqliteExecutor<'e>,
{
    let row: Option<RepositoryRow> = sqlx::query_as(
        r#"
        SELECT id, full_name, url, workspace_id
        FROM github_repository
        WHERE full_name = ?
        "#,
    )
    .bind(full_name)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Into::into))
}

pub(super) async fn fetch_conversation_for_issue<'e, E>(
    executor: E,
    repo_id: &str,
    issue_number: i64,
) -> StorageResult<Option<Conversation>>
where
    E: SqliteExecutor<'e>,
{
    let row: Option<ConversationRow> = sqlx::query_as(
        r#"
        SELECT id, repo_id, issue_number, status, created_at
        FROM conversation
        WHERE repo_id = ? AND issue_number = ?
        "#,
    )
    .bind(repo_id)
    .bind(issue_number)
    .fetch_optional(executor)
    .await?;

    row.map(TryInto::try_into).transpose()
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct RepositoryRow {
    id: String,
    full_name: String,
    url: String,
    workspace_id: Option<String>,
}

impl From<RepositoryRow> for Repository {
    fn from(row: RepositoryRow) -> Self {
        Self {
            id: row.id,
            full_name: row.full_name,
            url: row.url,
            workspace_id: row.workspace_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: String,
    name: String,
    description: Option<String>,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ElementRow {
    id: String,
    parent_id: Option<String>,
    element_type: String,
    name: String,
    description: Option<String>,
    workspace_id: String,
}

impl TryFrom<ElementRow> for GraphElement {
    type Error = StorageError;

    fn try_from(row: ElementRow) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: row
                .element_type
                .parse()
                .map_err(|message| StorageError::Query { message })?,
            id: row.id,
            parent_id: row.parent_id,
            name: row.name,
            description: row.description,
            workspace_id: row.workspace_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RelationshipRow {
    source_id: String,
    source_name: String,
    destination_id: String,
    destination_name: String,
    description: Option<String>,
}

impl From<RelationshipRow> for ResolvedRelationship {
    fn from(row: RelationshipRow) -> Self {
        Self {
            source_id: row.source_id,
            source_name: row.source_name,
            destination_id: row.destination_id,
            destination_name: row.destination_name,
            description: row.description,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    repo_id: String,
    issue_number: i64,
    status: String,
    created_at: String,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = StorageError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row
                .status
                .parse()
                .map_err(|message| StorageError::Query { message })?,
            id: row.id,
            repo_id: row.repo_id,
            issue_number: row.issue_number,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    role: String,
    content: String,
    created_at: String,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            role: row
                .role
                .parse()
                .map_err(|message| StorageError::Query { message })?,
            id: row.id,
            content: row.content,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}
