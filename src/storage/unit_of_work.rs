use sqlx::{QueryBuilder, Sqlite, Transaction};
use tracing::debug;

use super::sqlite::{fetch_conversation_for_issue, fetch_repository};
use super::{
    format_timestamp, Conversation, ConversationStatus, GraphElement, Relationship, Repository,
    StoredMessage, Workspace,
};
use crate::error::{StorageError, StorageResult};

/// Rows per multi-row INSERT, keeping bind counts under SQLite's limit.
const BULK_CHUNK: usize = 100;

/// An open transaction over the store.
///
/// Dropping it without [`UnitOfWork::commit`] rolls everything back.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

fn expect_rows(operation: &'static str, expected: u64, actual: u64) -> StorageResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StorageError::RowCountMismatch {
            operation,
            expected,
            actual,
        })
    }
}

impl UnitOfWork {
    pub(super) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    /// Make every write of this unit durable.
    pub async fn commit(self) -> StorageResult<()> {
        self.tx.commit().await?;
        debug!("Unit of work committed");
        Ok(())
    }

    /// Discard every write of this unit.
    pub async fn rollback(self) -> StorageResult<()> {
        self.tx.rollback().await?;
        debug!("Unit of work rolled back");
        Ok(())
    }

    // ========================================================================
    // Repositories and workspaces
    // ========================================================================

    /// Look up a repository inside this transaction.
    pub async fn repository(&mut self, full_name: &str) -> StorageResult<Option<Repository>> {
        fetch_repository(&mut *self.tx, full_name).await
    }

    /// Insert a repository. A duplicate full name is a conflict.
    pub async fn write_repository(&mut self, repository: &Repository) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO github_repository (id, full_name, url, workspace_id)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&repository.id)
        .bind(&repository.full_name)
        .bind(&repository.url)
        .bind(&repository.workspace_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            StorageError::from_write(
                e,
                format!("repository {} already exists", repository.full_name),
            )
        })?;

        expect_rows("write repository", 1, result.rows_affected())
    }

    /// Insert a workspace.
    pub async fn write_workspace(&mut self, workspace: &Workspace) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO workspace (id, name, description)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&workspace.id)
        .bind(&workspace.name)
        .bind(&workspace.description)
        .execute(&mut *self.tx)
        .await?;

        expect_rows("write workspace", 1, result.rows_affected())
    }

    /// Point a repository at a workspace.
    pub async fn link_repo_to_workspace(
        &mut self,
        repo_id: &str,
        workspace_id: &str,
    ) -> StorageResult<()> {
        let result = sqlx::query("UPDATE github_repository SET workspace_id = ? WHERE id = ?")
            .bind(workspace_id)
            .bind(repo_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                StorageError::from_write(
                    e,
                    format!("workspace {} is already linked to a repository", workspace_id),
                )
            })?;

        expect_rows("link repository", 1, result.rows_affected())
    }

    /// Clear a repository's workspace link.
    pub async fn unlink_repo(&mut self, repo_id: &str) -> StorageResult<()> {
        let result = sqlx::query("UPDATE github_repository SET workspace_id = NULL WHERE id = ?")
            .bind(repo_id)
            .execute(&mut *self.tx)
            .await?;

        expect_rows("unlink repository", 1, result.rows_affected())
    }

    /// Delete a workspace row. Its elements and relationships must already be gone.
    pub async fn delete_workspace(&mut self, workspace_id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM workspace WHERE id = ?")
            .bind(workspace_id)
            .execute(&mut *self.tx)
            .await?;

        expect_rows("delete workspace", 1, result.rows_affected())
    }

    // ========================================================================
    // Elements and relationships
    // ========================================================================

    /// Insert elements in order; parents must precede their children.
    pub async fn write_elements(&mut self, elements: &[GraphElement]) -> StorageResult<()> {
        let mut written = 0u64;
        for chunk in elements.chunks(BULK_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO element (id, parent_id, element_type, name, description, workspace_id) ",
            );
            builder.push_values(chunk, |mut row, element| {
                row.push_bind(&element.id)
                    .push_bind(&element.parent_id)
                    .push_bind(element.kind.to_string())
                    .push_bind(&element.name)
                    .push_bind(&element.description)
                    .push_bind(&element.workspace_id);
            });
            written += builder.build().execute(&mut *self.tx).await?.rows_affected();
        }

        expect_rows("write elements", elements.len() as u64, written)
    }

    /// Insert relationships in order.
    pub async fn write_relationships(&mut self, relationships: &[Relationship]) -> StorageResult<()> {
        let mut written = 0u64;
        for chunk in relationships.chunks(BULK_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO relationship (start_element, end_element, description, workspace_id) ",
            );
            builder.push_values(chunk, |mut row, relationship| {
                row.push_bind(&relationship.source_id)
                    .push_bind(&relationship.destination_id)
                    .push_bind(&relationship.description)
                    .push_bind(&relationship.workspace_id);
            });
            written += builder.build().execute(&mut *self.tx).await?.rows_affected();
        }

        expect_rows("write relationships", relationships.len() as u64, written)
    }

    /// Delete every element of a workspace, returning how many were removed.
    pub async fn delete_workspace_elements(&mut self, workspace_id: &str) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM element WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete every relationship of a workspace, returning how many were removed.
    pub async fn delete_workspace_relationships(
        &mut self,
        workspace_id: &str,
    ) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM relationship WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    /// The conversation for an issue, read inside this transaction.
    pub async fn conversation_for_issue(
        &mut self,
        repo_id: &str,
        issue_number: i64,
    ) -> StorageResult<Option<Conversation>> {
        fetch_conversation_for_issue(&mut *self.tx, repo_id, issue_number).await
    }

    /// Insert a conversation. A second one for the same issue is a conflict.
    pub async fn write_conversation(&mut self, conversation: &Conversation) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversation (id, repo_id, issue_number, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.repo_id)
        .bind(conversation.issue_number)
        .bind(conversation.status.to_string())
        .bind(format_timestamp(&conversation.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            StorageError::from_write(
                e,
                format!(
                    "a conversation already exists for issue #{}",
                    conversation.issue_number
                ),
            )
        })?;

        expect_rows("write conversation", 1, result.rows_affected())
    }

    /// Store a message and attach it to a conversation.
    pub async fn add_message(
        &mut self,
        conversation_id: &str,
        message: &StoredMessage,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO message (id, role, content, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(format_timestamp(&message.created_at))
        .execute(&mut *self.tx)
        .await?;
        expect_rows("write message", 1, result.rows_affected())?;

        let result = sqlx::query(
            r#"
            INSERT INTO conversation_message (conversation_id, message_id)
            VALUES (?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(&message.id)
        .execute(&mut *self.tx)
        .await?;

        expect_rows("link message", 1, result.rows_affected())
    }

    /// Move an in-progress conversation to `status`.
    ///
    /// Fails with `NotFound` for an unknown conversation and with
    /// `InvalidTransition` once the conversation has reached a terminal status.
    pub async fn update_conversation_status(
        &mut self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> StorageResult<()> {
        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM conversation WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(&mut *self.tx)
                .await?;

        let Some((current,)) = current else {
            return Err(StorageError::NotFound {
                entity: "Conversation",
                key: conversation_id.to_string(),
            });
        };

        if current != ConversationStatus::InProgress.to_string()
            || status == ConversationStatus::InProgress
        {
            return Err(StorageError::InvalidTransition {
                conversation_id: conversation_id.to_string(),
                from: current,
                to: status.to_string(),
            });
        }

        let result = sqlx::query("UPDATE conversation SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(conversation_id)
            .execute(&mut *self.tx)
            .await?;

        expect_rows("update conversation status", 1, result.rows_affected())
    }
}
