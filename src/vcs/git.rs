//! Local git working copies backed by libgit2.

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, FetchOptions, ObjectType, Oid, PushOptions, RemoteCallbacks,
    Repository, Signature, TreeWalkMode, TreeWalkResult,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{VcsError, VcsResult};

/// Author and committer name for generated commits.
pub const BOT_NAME: &str = "c4-issue-assistant[bot]";
/// Author and committer email for generated commits.
pub const BOT_EMAIL: &str = "c4-issue-assistant[bot]@users.noreply.github.com";

/// Username GitHub expects alongside an installation token.
const TOKEN_USER: &str = "x-access-token";

fn token_callbacks<'a>(token: &str) -> RemoteCallbacks<'a> {
    let token = token.to_string();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, _allowed| {
        Cred::userpass_plaintext(TOKEN_USER, &token)
    });
    callbacks
}

/// A cloned repository with a working directory.
pub struct GitCheckout {
    repo: Repository,
    workdir: PathBuf,
}

impl GitCheckout {
    /// Clone `url` into `into`, authenticating with `token` when asked.
    pub fn clone(url: &str, into: &Path, token: &str) -> VcsResult<Self> {
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(token_callbacks(token));

        let repo = RepoBuilder::new().fetch_options(fetch).clone(url, into)?;
        info!(path = %into.display(), "Repository cloned");
        Self::from_repository(repo)
    }

    /// Open an existing working copy.
    pub fn open(path: &Path) -> VcsResult<Self> {
        Self::from_repository(Repository::open(path)?)
    }

    fn from_repository(repo: Repository) -> VcsResult<Self> {
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| git2::Error::from_str("repository has no working directory"))?;
        Ok(Self { repo, workdir })
    }

    /// Root of the working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Create `name` at HEAD and check it out.
    pub fn create_branch(&self, name: &str) -> VcsResult<()> {
        let head = self.repo.head()?.peel_to_commit()?;
        self.repo.branch(name, &head, false)?;
        self.repo.set_head(&format!("refs/heads/{}", name))?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        debug!(branch = %name, "Branch created");
        Ok(())
    }

    /// Name of the checked out branch.
    pub fn current_branch(&self) -> VcsResult<String> {
        let head = self.repo.head()?;
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| VcsError::Git(git2::Error::from_str("HEAD is not a named branch")))
    }

    /// Paths of every file committed at HEAD.
    pub fn file_tree(&self) -> VcsResult<Vec<String>> {
        let tree = self.repo.head()?.peel_to_tree()?;
        let mut paths = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    paths.push(format!("{}{}", root, name));
                }
            }
            TreeWalkResult::Ok
        })?;
        Ok(paths)
    }

    /// Drop a path from the index.
    pub fn remove_from_index(&self, path: &str) -> VcsResult<()> {
        let mut index = self.repo.index()?;
        index.remove_path(Path::new(path))?;
        index.write()?;
        Ok(())
    }

    /// Stage the working tree contents of `path`, even when ignore rules match it.
    pub fn stage_path(&self, path: &str) -> VcsResult<()> {
        let mut index = self.repo.index()?;
        index.add_path(Path::new(path))?;
        index.write()?;
        Ok(())
    }

    /// Commit the index on top of HEAD as the bot identity.
    pub fn commit(&self, message: &str) -> VcsResult<Oid> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let parent = self.repo.head()?.peel_to_commit()?;
        let signature = Signature::now(BOT_NAME, BOT_EMAIL)?;

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &[&parent])?;
        info!(commit = %oid, "Changes committed");
        Ok(oid)
    }

    /// Push `branch` to `origin`, failing if the remote rejects the update.
    pub fn push_branch(&self, branch: &str, token: &str) -> VcsResult<()> {
        let reference = format!("refs/heads/{}", branch);
        let mut rejection: Option<String> = None;

        {
            let mut callbacks = token_callbacks(token);
            callbacks.push_update_reference(|_name, status| {
                if let Some(message) = status {
                    rejection = Some(message.to_string());
                }
                Ok(())
            });

            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);

            let mut remote = self.repo.find_remote("origin")?;
            remote.push(&[format!("{0}:{0}", reference)], Some(&mut options))?;
        }

        if let Some(message) = rejection {
            return Err(VcsError::PushRejected { reference, message });
        }
        info!(branch = %branch, "Branch pushed");
        Ok(())
    }
}
