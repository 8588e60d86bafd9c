use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{FileBlob, PullRequestRef, TokenProvider, VcsHost};
use crate::config::{GitHubConfig, RequestConfig};
use crate::error::{VcsError, VcsResult};

const USER_AGENT: &str = concat!("c4-issue-assistant/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const ACCEPT_JSON: &str = "application/vnd.github+json";
const ACCEPT_RAW: &str = "application/vnd.github.raw+json";

/// GitHub REST client authenticated with installation tokens
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    api_url: String,
    tokens: Arc<dyn TokenProvider>,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

#[derive(Deserialize)]
struct CreatedPullRequest {
    number: i64,
    html_url: String,
}

impl GitHubClient {
    /// Create a new client
    pub fn new(
        config: &GitHubConfig,
        request_config: &RequestConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> VcsResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// Build `{api_url}/repos/{owner}/{name}/...`, escaping every segment.
    fn repo_url(&self, repo: &str, segments: &[&str]) -> VcsResult<Url> {
        let mut url = Url::parse(&self.api_url).map_err(|e| VcsError::InvalidResponse {
            message: format!("invalid GitHub API URL '{}': {}", self.api_url, e),
        })?;
        url.path_segments_mut()
            .map_err(|_| VcsError::InvalidResponse {
                message: format!("GitHub API URL '{}' cannot take a path", self.api_url),
            })?
            .pop_if_empty()
            .push("repos")
            .extend(repo.split('/'))
            .extend(segments.iter().flat_map(|s| s.split('/')));
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url, accept: &str) -> VcsResult<RequestBuilder> {
        let token = self.tokens.generate_installation_token().await?;
        Ok(self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", API_VERSION))
    }

    async fn send(&self, request: RequestBuilder) -> VcsResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(VcsError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> VcsResult<T> {
        response
            .json()
            .await
            .map_err(|e| VcsError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }
}

#[async_trait]
impl VcsHost for GitHubClient {
    async fn fetch_file_tree(&self, repo: &str, branch: &str) -> VcsResult<Vec<String>> {
        let mut url = self.repo_url(repo, &["git", "trees", branch])?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let request = self.request(Method::GET, url, ACCEPT_JSON).await?;
        let tree: TreeResponse = Self::json(self.send(request).await?).await?;
        if tree.truncated {
            warn!(repo = %repo, branch = %branch, "File tree listing was truncated");
        }

        let paths: Vec<String> = tree
            .tree
            .into_iter()
            .filter(|entry| entry.entry_type == "blob")
            .map(|entry| entry.path)
            .collect();
        debug!(repo = %repo, branch = %branch, files = paths.len(), "Fetched file tree");
        Ok(paths)
    }

    async fn fetch_file_blobs(&self, repo: &str, paths: &[String]) -> VcsResult<Vec<FileBlob>> {
        let mut blobs = Vec::with_capacity(paths.len());
        for path in paths {
            let mut url = self.repo_url(repo, &["contents", path.as_str()])?;
            url.query_pairs_mut().append_pair("ref", "HEAD");

            let request = self.request(Method::GET, url, ACCEPT_RAW).await?;
            let contents = self.send(request).await?.text().await?;
            blobs.push(FileBlob {
                path: path.clone(),
                contents,
            });
        }
        debug!(repo = %repo, files = blobs.len(), "Fetched file contents");
        Ok(blobs)
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        base: &str,
        branch: &str,
        title: &str,
        body: &str,
    ) -> VcsResult<PullRequestRef> {
        let url = self.repo_url(repo, &["pulls"])?;
        let request = self.request(Method::POST, url, ACCEPT_JSON).await?.json(&json!({
            "title": title,
            "head": branch,
            "base": base,
            "body": body,
        }));

        let created: CreatedPullRequest = Self::json(self.send(request).await?).await?;
        info!(
            repo = %repo,
            branch = %branch,
            number = created.number,
            "Pull request opened"
        );
        Ok(PullRequestRef {
            number: created.number,
            html_url: created.html_url,
        })
    }

    async fn create_comment(&self, repo: &str, issue_number: i64, body: &str) -> VcsResult<()> {
        let number = issue_number.to_string();
        let url = self.repo_url(repo, &["issues", number.as_str(), "comments"])?;
        let request = self
            .request(Method::POST, url, ACCEPT_JSON)
            .await?
            .json(&json!({ "body": body }));

        self.send(request).await?;
        info!(repo = %repo, issue = issue_number, "Comment posted");
        Ok(())
    }
}
