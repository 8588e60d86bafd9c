//! Version control: the GitHub API, local git checkouts and applying
//! pull request plans to them.

mod applier;
mod git;
mod github;

pub use applier::ChangeApplier;
pub use git::{GitCheckout, BOT_EMAIL, BOT_NAME};
pub use github::GitHubClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{VcsError, VcsResult};

/// A GitHub issue as delivered by a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Issue number within the repository.
    pub number: i64,
    /// Issue title.
    pub title: String,
    /// Issue body, absent when left empty.
    #[serde(default)]
    pub body: Option<String>,
}

/// Repository coordinates as delivered by a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// `owner/name`.
    pub full_name: String,
    /// URL git clones from.
    pub clone_url: String,
}

/// Author of a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// GitHub login.
    pub login: String,
}

/// An issue comment as delivered by a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment text.
    pub body: String,
    /// Who wrote it.
    pub user: User,
}

/// Contents of one repository file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlob {
    /// Repository-relative path.
    pub path: String,
    /// Full text contents.
    pub contents: String,
}

/// A pull request that was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    /// Pull request number.
    pub number: i64,
    /// Browser URL.
    pub html_url: String,
}

/// Remote repository host operations.
#[async_trait]
pub trait VcsHost: Send + Sync {
    /// Paths of every file on `branch`.
    async fn fetch_file_tree(&self, repo: &str, branch: &str) -> VcsResult<Vec<String>>;

    /// Contents of the given files, in request order.
    async fn fetch_file_blobs(&self, repo: &str, paths: &[String]) -> VcsResult<Vec<FileBlob>>;

    /// Open a pull request from `branch` into `base`.
    async fn create_pull_request(
        &self,
        repo: &str,
        base: &str,
        branch: &str,
        title: &str,
        body: &str,
    ) -> VcsResult<PullRequestRef>;

    /// Comment on an issue.
    async fn create_comment(&self, repo: &str, issue_number: i64, body: &str) -> VcsResult<()>;
}

/// Source of short-lived credentials for git and API calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A token valid for the installation's repositories.
    async fn generate_installation_token(&self) -> VcsResult<String>;
}

/// Hands out a token fixed at startup.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wrap an existing token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn generate_installation_token(&self) -> VcsResult<String> {
        if self.token.is_empty() {
            return Err(VcsError::Credential {
                message: "installation token is empty".to_string(),
            });
        }
        Ok(self.token.clone())
    }
}
