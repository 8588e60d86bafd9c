//! Persistence of LLM conversations held about repository issues.

mod orchestrator;

pub use orchestrator::{ConversationOrchestrator, IssueSolution};

use tracing::{debug, info};

use crate::error::{AppResult, StorageError};
use crate::llm::ChatMessage;
use crate::storage::{Conversation, ConversationStatus, SqliteStorage, StoredMessage};

/// Starts conversations, records their messages and moves their status.
#[derive(Clone)]
pub struct ConversationManager {
    storage: SqliteStorage,
}

fn stored(message: &ChatMessage) -> StoredMessage {
    StoredMessage::new(message.role.into(), message.content.clone())
}

impl ConversationManager {
    /// Create a manager over the given store.
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    /// Open the conversation for an issue together with its first messages.
    ///
    /// Fails with `NotFound` for an unknown repository and with `Conflict`
    /// when the issue already has a conversation. Nothing is written on
    /// failure.
    pub async fn start_conversation(
        &self,
        repo_name: &str,
        issue_number: i64,
        messages: &[ChatMessage],
    ) -> AppResult<Conversation> {
        let mut uow = self.storage.begin().await?;
        let Some(repository) = uow.repository(repo_name).await? else {
            return Err(StorageError::NotFound {
                entity: "Repository",
                key: repo_name.to_string(),
            }
            .into());
        };

        if uow
            .conversation_for_issue(&repository.id, issue_number)
            .await?
            .is_some()
        {
            return Err(StorageError::Conflict {
                message: format!(
                    "a conversation about issue #{} in {} already exists",
                    issue_number, repo_name
                ),
            }
            .into());
        }

        let conversation = Conversation::new(&repository.id, issue_number);
        uow.write_conversation(&conversation).await?;
        for message in messages {
            uow.add_message(&conversation.id, &stored(message)).await?;
        }
        uow.commit().await?;

        info!(
            conversation_id = %conversation.id,
            repo = %repo_name,
            issue = issue_number,
            messages = messages.len(),
            "Conversation started"
        );
        Ok(conversation)
    }

    /// Append one message to an existing conversation.
    pub async fn add_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
    ) -> AppResult<StoredMessage> {
        self.get_conversation(conversation_id).await?;

        let message = stored(message);
        let mut uow = self.storage.begin().await?;
        uow.add_message(conversation_id, &message).await?;
        uow.commit().await?;

        debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            role = %message.role,
            "Message recorded"
        );
        Ok(message)
    }

    /// Move an in-progress conversation to a terminal status.
    pub async fn update_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> AppResult<()> {
        let mut uow = self.storage.begin().await?;
        uow.update_conversation_status(conversation_id, status)
            .await?;
        uow.commit().await?;

        info!(conversation_id = %conversation_id, status = %status, "Conversation status updated");
        Ok(())
    }

    /// Record the final answer and mark the conversation COMPLETED, atomically.
    pub async fn complete(&self, conversation_id: &str, answer: &ChatMessage) -> AppResult<()> {
        let message = stored(answer);
        let mut uow = self.storage.begin().await?;
        uow.update_conversation_status(conversation_id, ConversationStatus::Completed)
            .await?;
        uow.add_message(conversation_id, &message).await?;
        uow.commit().await?;

        info!(conversation_id = %conversation_id, "Conversation completed");
        Ok(())
    }

    /// Fetch a conversation by id.
    pub async fn get_conversation(&self, conversation_id: &str) -> AppResult<Conversation> {
        self.storage
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                StorageError::NotFound {
                    entity: "Conversation",
                    key: conversation_id.to_string(),
                }
                .into()
            })
    }

    /// The conversation about an issue, if one was started.
    pub async fn conversation_for_issue(
        &self,
        repo_name: &str,
        issue_number: i64,
    ) -> AppResult<Option<Conversation>> {
        let Some(repository) = self.storage.get_repository(repo_name).await? else {
            return Err(StorageError::NotFound {
                entity: "Repository",
                key: repo_name.to_string(),
            }
            .into());
        };
        Ok(self
            .storage
            .find_conversation(&repository.id, issue_number)
            .await?)
    }

    /// All conversations, oldest first.
    pub async fn list_conversations(&self) -> AppResult<Vec<Conversation>> {
        let conversations = self.storage.list_conversations().await?;
        debug!(count = conversations.len(), "Listed conversations");
        Ok(conversations)
    }

    /// Messages of a conversation in creation order.
    pub async fn list_messages(&self, conversation_id: &str) -> AppResult<Vec<StoredMessage>> {
        self.get_conversation(conversation_id).await?;
        let messages = self.storage.list_messages(conversation_id).await?;
        debug!(
            conversation_id = %conversation_id,
            count = messages.len(),
            "Listed messages"
        );
        Ok(messages)
    }
}
