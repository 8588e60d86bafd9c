//! Prompt text sent to the model and posted back to GitHub.
//!
//! Keeping every prompt here makes the two-round protocol easy to read
//! and lets tests pin down exactly what the model sees.

use crate::vcs::{FileBlob, Issue};

/// Opening instructions naming the repository.
pub fn system_prompt(repo_name: &str) -> String {
    format!(
        r#"You are a software engineer working on a repository called {repo_name}.

You will be provided with an issue description, the repository's file tree and its architecture model written in C4 notation.

Your task is to respond to user messages with your best attempt at solving the issue."#
    )
}

/// First user message: the model, the file tree and the issue, asking for
/// the files the model needs to read.
pub fn repository_info_message(notation: &str, file_tree: &[String], issue: &Issue) -> String {
    let tree = if file_tree.is_empty() {
        "(the repository has no files)".to_string()
    } else {
        file_tree
            .iter()
            .map(|path| format!("  - {}", path))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let body = issue.body.as_deref().unwrap_or("(no description)");

    format!(
        r#"Here is some information about the repository:

* C4 model:
```
{notation}
```
* File tree:
{tree}
* Issue title: {title}
* Issue body: {body}

Your first task is to give me the list of files you need to inspect in full before creating your solution.
Pick the files you will need to know in full or modify when fixing the issue.
Only list paths that appear in the file tree above.
Respond with a single list of strings, each a path from the **repository root**."#,
        title = issue.title,
    )
}

/// Second user message: the requested files in full, asking for the plan.
pub fn file_contents_message(blobs: &[FileBlob]) -> String {
    let files = if blobs.is_empty() {
        "(no files were requested)".to_string()
    } else {
        blobs
            .iter()
            .map(|blob| format!("## {}\n```\n{}\n```", blob.path, blob.contents))
            .collect::<Vec<_>>()
            .join("\n---\n")
    };

    format!(
        r#"Great. I am now sending you the files you requested. Your task is to now produce a pull request.
Your response should consist of:
* Pull request title
* Pull request body
* Your changes: **IMPORTANT** - send every updated file in __full__. It must be able to overwrite the original file without breaking any functionality the pull request does not touch.

Here are the files you requested:

{files}"#
    )
}

/// Footer appended to pull request bodies so GitHub links the issue.
pub fn closes_footer(issue_number: i64) -> String {
    format!("\n\nCloses #{}", issue_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(body: Option<&str>) -> Issue {
        Issue {
            number: 7,
            title: "Add a readme".to_string(),
            body: body.map(str::to_string),
        }
    }

    #[test]
    fn test_system_prompt_names_repo() {
        assert!(system_prompt("acme/shop").contains("called acme/shop"));
    }

    #[test]
    fn test_repository_info_lists_tree_and_issue() {
        let tree = vec!["src/main.rs".to_string(), "Cargo.toml".to_string()];
        let message = repository_info_message("workspace {}", &tree, &issue(Some("Please")));

        assert!(message.contains("workspace {}"));
        assert!(message.contains("  - src/main.rs\n  - Cargo.toml"));
        assert!(message.contains("* Issue title: Add a readme"));
        assert!(message.contains("* Issue body: Please"));
    }

    #[test]
    fn test_repository_info_handles_empty_inputs() {
        let message = repository_info_message("", &[], &issue(None));
        assert!(message.contains("(the repository has no files)"));
        assert!(message.contains("(no description)"));
    }

    #[test]
    fn test_file_contents_separates_files() {
        let blobs = vec![
            FileBlob {
                path: "a.txt".to_string(),
                contents: "one".to_string(),
            },
            FileBlob {
                path: "b.txt".to_string(),
                contents: "two".to_string(),
            },
        ];
        let message = file_contents_message(&blobs);
        assert!(message.ends_with("## a.txt\n```\none\n```\n---\n## b.txt\n```\ntwo\n```"));
    }

    #[test]
    fn test_closes_footer() {
        assert_eq!(closes_footer(12), "\n\nCloses #12");
    }
}
