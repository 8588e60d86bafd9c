use git2::Oid;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path};
use tracing::{debug, info};

use super::GitCheckout;
use crate::error::{AppResult, ChangeError, ChangeResult};
use crate::llm::{ChangeType, FileChange, PullRequestPlan};

/// Applies a pull request plan to a working copy and commits it.
pub struct ChangeApplier<'a> {
    checkout: &'a GitCheckout,
}

impl<'a> ChangeApplier<'a> {
    /// Wrap a checkout.
    pub fn new(checkout: &'a GitCheckout) -> Self {
        Self { checkout }
    }

    /// Check every change against `tree` without touching the disk.
    ///
    /// Changes are checked in order, so a file created earlier in the plan
    /// may be modified later in it.
    pub fn validate(changes: &[FileChange], tree: &[String]) -> ChangeResult<()> {
        let mut present: HashSet<&str> = tree.iter().map(String::as_str).collect();

        for change in changes {
            check_path(&change.file_path)?;
            let path = change.file_path.as_str();
            match change.change_type {
                ChangeType::Create => {
                    if !present.insert(path) {
                        return Err(ChangeError::AlreadyExists {
                            path: path.to_string(),
                        });
                    }
                }
                ChangeType::Modify => {
                    if !present.contains(path) {
                        return Err(missing(change));
                    }
                }
                ChangeType::Delete => {
                    if !present.remove(path) {
                        return Err(missing(change));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate, write and stage every change, then commit with the plan title.
    ///
    /// Nothing is written unless every change passes validation and none of
    /// the target paths runs through a symbolic link in the working copy.
    pub fn apply(&self, plan: &PullRequestPlan, tree: &[String]) -> AppResult<Oid> {
        Self::validate(&plan.updated_files, tree)?;

        let root = self.checkout.workdir();
        for change in &plan.updated_files {
            check_no_symlink(root, change)?;
        }

        for change in &plan.updated_files {
            let target = root.join(&change.file_path);
            match change.change_type {
                ChangeType::Create | ChangeType::Modify => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).map_err(|e| io_error(change, e))?;
                    }
                    fs::write(&target, &change.new_contents).map_err(|e| io_error(change, e))?;
                    self.checkout.stage_path(&change.file_path)?;
                }
                ChangeType::Delete => {
                    fs::remove_file(&target).map_err(|e| io_error(change, e))?;
                    self.checkout.remove_from_index(&change.file_path)?;
                }
            }
            debug!(path = %change.file_path, change = %change.change_type, "Applied change");
        }

        let oid = self.checkout.commit(&plan.pull_request_title)?;
        info!(
            commit = %oid,
            changes = plan.updated_files.len(),
            "Pull request plan applied"
        );
        Ok(oid)
    }
}

fn missing(change: &FileChange) -> ChangeError {
    ChangeError::FileMissing {
        path: change.file_path.clone(),
        change: change.change_type.verb(),
    }
}

fn io_error(change: &FileChange, source: std::io::Error) -> ChangeError {
    ChangeError::Io {
        path: change.file_path.clone(),
        source,
    }
}

/// Reject a change whose path, or any parent directory of it, is a symlink.
fn check_no_symlink(root: &Path, change: &FileChange) -> ChangeResult<()> {
    let mut current = root.to_path_buf();
    for component in Path::new(&change.file_path).components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ChangeError::InvalidPath {
                    path: change.file_path.clone(),
                    reason: "path goes through a symbolic link",
                });
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(change, e)),
        }
    }
    Ok(())
}

/// Reject paths that could escape the working copy or touch git metadata.
fn check_path(raw: &str) -> ChangeResult<()> {
    let invalid = |reason| ChangeError::InvalidPath {
        path: raw.to_string(),
        reason,
    };

    if raw.is_empty() {
        return Err(invalid("path is empty"));
    }
    let path = Path::new(raw);
    if path.is_absolute() || raw.starts_with('/') || raw.starts_with('\\') {
        return Err(invalid("path is absolute"));
    }

    let mut components = path.components().peekable();
    if let Some(Component::Normal(first)) = components.peek() {
        if first.eq_ignore_ascii_case(".git") {
            return Err(invalid("path is inside .git"));
        }
    }
    for component in components {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir => return Err(invalid("path contains '..'")),
            _ => return Err(invalid("path is not a plain relative path")),
        }
    }
    Ok(())
}
