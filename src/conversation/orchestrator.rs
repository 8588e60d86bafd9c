use std::sync::Arc;

use tracing::{error, info};

use super::ConversationManager;
use crate::error::{AppError, AppResult};
use crate::llm::{perform_structured_query, ChatMessage, FilesResponse, LlmClient, PullRequestPlan};
use crate::model::ModelManager;
use crate::prompts;
use crate::storage::ConversationStatus;
use crate::vcs::{Issue, VcsHost};

/// Outcome of a conversation step, failing with the stage it was at.
type Step<T> = Result<T, (&'static str, AppError)>;

fn at<E: Into<AppError>>(stage: &'static str) -> impl Fn(E) -> (&'static str, AppError) {
    move |e| (stage, e.into())
}

/// Result of a completed conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueSolution {
    /// Conversation that produced the plan.
    pub conversation_id: String,
    /// The pull request to open.
    pub plan: PullRequestPlan,
}

/// Runs the two-round protocol that turns an issue into a pull request plan.
///
/// The conversation moves from IN_PROGRESS to COMPLETED or FAILED and never
/// back. Every message is stored before the next step can fail.
#[derive(Clone)]
pub struct ConversationOrchestrator {
    conversations: ConversationManager,
    models: ModelManager,
    llm: Arc<dyn LlmClient>,
    vcs: Arc<dyn VcsHost>,
    model: String,
    base_branch: String,
}

impl ConversationOrchestrator {
    /// Wire the orchestrator to its collaborators.
    pub fn new(
        conversations: ConversationManager,
        models: ModelManager,
        llm: Arc<dyn LlmClient>,
        vcs: Arc<dyn VcsHost>,
        model: impl Into<String>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            conversations,
            models,
            llm,
            vcs,
            model: model.into(),
            base_branch: base_branch.into(),
        }
    }

    /// Ask the model for a pull request that resolves `issue`.
    pub async fn produce_issue_solution(
        &self,
        repo_name: &str,
        issue: &Issue,
    ) -> AppResult<IssueSolution> {
        let notation = self.models.export_notation(repo_name).await?;
        let file_tree = self
            .vcs
            .fetch_file_tree(repo_name, &self.base_branch)
            .await?;

        let system = ChatMessage::system(prompts::system_prompt(repo_name));
        let first = ChatMessage::user(prompts::repository_info_message(
            &notation, &file_tree, issue,
        ));
        let conversation = self
            .conversations
            .start_conversation(repo_name, issue.number, &[system.clone(), first.clone()])
            .await?;
        let conversation_id = conversation.id;

        let plan = match self
            .converse(&conversation_id, repo_name, vec![system, first])
            .await
        {
            Ok(plan) => plan,
            Err((stage, cause)) => return Err(self.fail(&conversation_id, stage, cause).await),
        };

        info!(
            conversation_id = %conversation_id,
            repo = %repo_name,
            issue = issue.number,
            changes = plan.updated_files.len(),
            "Issue solution produced"
        );
        Ok(IssueSolution {
            conversation_id,
            plan,
        })
    }

    /// Both rounds after the opening messages are stored. An error carries
    /// the stage it happened at.
    async fn converse(
        &self,
        conversation_id: &str,
        repo_name: &str,
        mut history: Vec<ChatMessage>,
    ) -> Step<PullRequestPlan> {
        let files: FilesResponse =
            perform_structured_query(self.llm.as_ref(), &self.model, &history)
                .await
                .map_err(at("after the first user message"))?;

        let answer = serde_json::to_string(&files)
            .map(ChatMessage::assistant)
            .map_err(at("while recording the first answer"))?;
        self.conversations
            .add_message(conversation_id, &answer)
            .await
            .map_err(at("while recording the first answer"))?;
        history.push(answer);

        let blobs = self
            .vcs
            .fetch_file_blobs(repo_name, &files.file_list)
            .await
            .map_err(at("while fetching requested files"))?;

        let second = ChatMessage::user(prompts::file_contents_message(&blobs));
        self.conversations
            .add_message(conversation_id, &second)
            .await
            .map_err(at("while recording the second user message"))?;
        history.push(second);

        let plan: PullRequestPlan =
            perform_structured_query(self.llm.as_ref(), &self.model, &history)
                .await
                .map_err(at("after the second user message"))?;

        let answer = serde_json::to_string(&plan)
            .map(ChatMessage::assistant)
            .map_err(at("while completing the conversation"))?;
        self.conversations
            .complete(conversation_id, &answer)
            .await
            .map_err(at("while completing the conversation"))?;

        Ok(plan)
    }

    /// Mark the conversation FAILED and wrap `cause` with its context.
    ///
    /// A status update that itself fails is returned instead of `cause`.
    async fn fail(&self, conversation_id: &str, stage: &'static str, cause: AppError) -> AppError {
        error!(
            conversation_id = %conversation_id,
            stage,
            error = %cause,
            "Conversation step failed"
        );

        if let Err(storage_error) = self
            .conversations
            .update_status(conversation_id, ConversationStatus::Failed)
            .await
        {
            error!(
                conversation_id = %conversation_id,
                error = %storage_error,
                "Could not mark conversation as failed"
            );
            return storage_error;
        }

        AppError::ConversationFailed {
            conversation_id: conversation_id.to_string(),
            stage,
            source: Box::new(cause),
        }
    }
}
