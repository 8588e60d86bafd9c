//! End-to-end handling of issue webhooks: conversation, working copy,
//! push and pull request.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::conversation::{ConversationManager, ConversationOrchestrator, IssueSolution};
use crate::error::{AppError, AppResult};
use crate::llm::PullRequestPlan;
use crate::prompts;
use crate::storage::ConversationStatus;
use crate::vcs::{
    ChangeApplier, Comment, GitCheckout, Issue, PullRequestRef, RepositoryRef, TokenProvider,
    VcsHost,
};

/// Longest slug taken from an issue title.
const MAX_SLUG_LEN: usize = 40;

/// A GitHub `issues` or `issue_comment` webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event action, e.g. `opened` or `created`.
    pub action: String,
    /// Issue the event is about.
    pub issue: Issue,
    /// Repository the issue lives in.
    pub repository: RepositoryRef,
    /// Present on comment events.
    #[serde(default)]
    pub comment: Option<Comment>,
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// A pull request was opened for a new issue.
    PullRequestOpened(PullRequestRef),
    /// A status comment was posted.
    Commented,
    /// Nothing was done.
    Ignored {
        /// Why the event was skipped.
        reason: String,
    },
}

/// Branch name for an issue: `<number>-<slugged title>`.
pub fn branch_name(issue: &Issue) -> String {
    let mut slug = String::new();
    for c in issue.title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');

    if slug.is_empty() {
        issue.number.to_string()
    } else {
        format!("{}-{}", issue.number, slug)
    }
}

/// Turns issue events into pull requests and comments.
pub struct IssuePipeline {
    orchestrator: ConversationOrchestrator,
    conversations: ConversationManager,
    vcs: Arc<dyn VcsHost>,
    tokens: Arc<dyn TokenProvider>,
    base_branch: String,
    bot_login: String,
}

impl IssuePipeline {
    /// Wire the pipeline to its collaborators.
    pub fn new(
        orchestrator: ConversationOrchestrator,
        conversations: ConversationManager,
        vcs: Arc<dyn VcsHost>,
        tokens: Arc<dyn TokenProvider>,
        base_branch: impl Into<String>,
        bot_login: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            conversations,
            vcs,
            tokens,
            base_branch: base_branch.into(),
            bot_login: bot_login.into(),
        }
    }

    /// Dispatch a webhook payload by action.
    pub async fn handle_event(&self, event: &WebhookEvent) -> AppResult<PipelineOutcome> {
        match (event.action.as_str(), &event.comment) {
            ("opened", None) => {
                let pull_request = self
                    .handle_new_issue(&event.repository, &event.issue)
                    .await?;
                Ok(PipelineOutcome::PullRequestOpened(pull_request))
            }
            ("created", Some(comment)) => {
                self.handle_new_comment(&event.repository, &event.issue, comment)
                    .await
            }
            (action, _) => {
                info!(action = %action, issue = event.issue.number, "Event ignored");
                Ok(PipelineOutcome::Ignored {
                    reason: format!("unhandled action '{}'", action),
                })
            }
        }
    }

    /// Produce a plan for a new issue, push it on a fresh branch and open a
    /// pull request. The working copy is removed on every exit path.
    pub async fn handle_new_issue(
        &self,
        repository: &RepositoryRef,
        issue: &Issue,
    ) -> AppResult<PullRequestRef> {
        info!(repo = %repository.full_name, issue = issue.number, "Handling new issue");

        let solution = self
            .orchestrator
            .produce_issue_solution(&repository.full_name, issue)
            .await?;
        let pull_request = match self.open_pull_request(repository, issue, &solution).await {
            Ok(pull_request) => pull_request,
            Err(e) => {
                error!(
                    repo = %repository.full_name,
                    issue = issue.number,
                    conversation_id = %solution.conversation_id,
                    error = %e,
                    "Plan completed but no pull request was opened"
                );
                return Err(e);
            }
        };

        info!(
            repo = %repository.full_name,
            issue = issue.number,
            conversation_id = %solution.conversation_id,
            pull_request = pull_request.number,
            "Issue handled"
        );
        Ok(pull_request)
    }

    /// Apply a completed plan on a fresh branch, push it and open the pull request.
    async fn open_pull_request(
        &self,
        repository: &RepositoryRef,
        issue: &Issue,
        solution: &IssueSolution,
    ) -> AppResult<PullRequestRef> {
        let token = self.tokens.generate_installation_token().await?;
        let branch = branch_name(issue);

        let clone_url = repository.clone_url.clone();
        let plan = solution.plan.clone();
        let push_branch = branch.clone();
        tokio::task::spawn_blocking(move || {
            push_plan(&clone_url, &push_branch, &plan, &token)
        })
        .await
        .map_err(|e| AppError::Internal {
            message: format!("git task failed: {}", e),
        })??;

        let body = format!(
            "{}{}",
            solution.plan.pull_request_body,
            prompts::closes_footer(issue.number)
        );
        Ok(self
            .vcs
            .create_pull_request(
                &repository.full_name,
                &self.base_branch,
                &branch,
                &solution.plan.pull_request_title,
                &body,
            )
            .await?)
    }

    /// Answer a comment with the state of the issue's conversation.
    ///
    /// Comments written by the bot itself are ignored.
    pub async fn handle_new_comment(
        &self,
        repository: &RepositoryRef,
        issue: &Issue,
        comment: &Comment,
    ) -> AppResult<PipelineOutcome> {
        if comment.user.login == self.bot_login {
            info!(issue = issue.number, "Latest comment is our own, skipping");
            return Ok(PipelineOutcome::Ignored {
                reason: "comment written by the assistant".to_string(),
            });
        }

        let status = match self
            .conversations
            .conversation_for_issue(&repository.full_name, issue.number)
            .await
        {
            Ok(Some(conversation)) => Some(conversation.status),
            Ok(None) => None,
            Err(e) if e.is_not_found() => {
                warn!(repo = %repository.full_name, "Comment on an unregistered repository");
                None
            }
            Err(e) => return Err(e),
        };

        self.vcs
            .create_comment(&repository.full_name, issue.number, status_comment(status))
            .await?;
        Ok(PipelineOutcome::Commented)
    }
}

fn status_comment(status: Option<ConversationStatus>) -> &'static str {
    match status {
        None => "I have not worked on this issue yet.",
        Some(ConversationStatus::InProgress) => {
            "I am still working on this issue and will open a pull request when I am done."
        }
        Some(ConversationStatus::Completed) => {
            "I have finished planning changes for this issue. If no pull request is linked \
             here, the changes could not be applied to the repository."
        }
        Some(ConversationStatus::Failed) => {
            "I could not produce a pull request for this issue."
        }
    }
}

/// Clone into a scoped temporary directory, apply `plan` on `branch` and push.
fn push_plan(clone_url: &str, branch: &str, plan: &PullRequestPlan, token: &str) -> AppResult<()> {
    let dir = tempfile::tempdir()?;
    let checkout = GitCheckout::clone(clone_url, dir.path(), token)?;
    checkout.create_branch(branch)?;

    let tree = checkout.file_tree()?;
    ChangeApplier::new(&checkout).apply(plan, &tree)?;
    checkout.push_branch(branch, token)?;
    Ok(())
}
