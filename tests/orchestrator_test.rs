//! Integration tests for the two-round issue conversation.
//!
//! The LLM and GitHub are mocked; storage is an in-memory database.

use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;
use std::sync::Arc;

use c4_issue_assistant::conversation::{ConversationManager, ConversationOrchestrator};
use c4_issue_assistant::error::{AppError, LlmError, LlmResult, VcsError, VcsResult};
use c4_issue_assistant::llm::{ChangeType, ChatMessage, LlmClient, ResponseFormat};
use c4_issue_assistant::model::ModelManager;
use c4_issue_assistant::storage::{ConversationStatus, MessageRole, SqliteStorage};
use c4_issue_assistant::vcs::{FileBlob, Issue, PullRequestRef, VcsHost};

mock! {
    pub Llm {}

    #[async_trait]
    impl LlmClient for Llm {
        async fn structured_query(
            &self,
            model: &str,
            messages: &[ChatMessage],
            format: &ResponseFormat,
        ) -> LlmResult<String>;
    }
}

mock! {
    pub Vcs {}

    #[async_trait]
    impl VcsHost for Vcs {
        async fn fetch_file_tree(&self, repo: &str, branch: &str) -> VcsResult<Vec<String>>;
        async fn fetch_file_blobs(&self, repo: &str, paths: &[String]) -> VcsResult<Vec<FileBlob>>;
        async fn create_pull_request(
            &self,
            repo: &str,
            base: &str,
            branch: &str,
            title: &str,
            body: &str,
        ) -> VcsResult<PullRequestRef>;
        async fn create_comment(&self, repo: &str, issue_number: i64, body: &str) -> VcsResult<()>;
    }
}

const REPO: &str = "acme/shop";
const NOTATION: &str = r#"workspace "Shop" {
    model {
        u = person "User"
    }
}"#;
const FILES_ANSWER: &str = r#"{"fileList":["README.md"]}"#;
const PLAN_ANSWER: &str = r##"{"pullRequestTitle":"Update readme","pullRequestBody":"Explains the shop","updatedFiles":[{"type":"MODIFY","filePath":"README.md","newContents":"# Shop\n"}]}"##;

fn issue() -> Issue {
    Issue {
        number: 7,
        title: "Document the shop".to_string(),
        body: Some("The readme is empty".to_string()),
    }
}

fn vcs_with_tree() -> MockVcs {
    let mut vcs = MockVcs::new();
    vcs.expect_fetch_file_tree()
        .withf(|repo, branch| repo == REPO && branch == "main")
        .returning(|_, _| Ok(vec!["README.md".to_string(), "src/main.rs".to_string()]));
    vcs
}

fn answer_files(llm: &mut MockLlm, result: fn() -> LlmResult<String>) {
    llm.expect_structured_query()
        .withf(|_, _, format| format.name == "files_response")
        .times(1)
        .returning(move |_, _, _| result());
}

fn answer_plan(llm: &mut MockLlm, result: fn() -> LlmResult<String>) {
    llm.expect_structured_query()
        .withf(|_, messages, format| format.name == "pull_request_plan" && messages.len() == 4)
        .times(1)
        .returning(move |_, _, _| result());
}

struct Harness {
    orchestrator: ConversationOrchestrator,
    conversations: ConversationManager,
    storage: SqliteStorage,
}

async fn harness(llm: MockLlm, vcs: MockVcs) -> Harness {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let models = ModelManager::new(storage.clone());
    models
        .initialize_repo(REPO, "https://github.com/acme/shop", NOTATION)
        .await
        .unwrap();

    let conversations = ConversationManager::new(storage.clone());
    let orchestrator = ConversationOrchestrator::new(
        conversations.clone(),
        models,
        Arc::new(llm),
        Arc::new(vcs),
        "gpt-test",
        "main",
    );
    Harness {
        orchestrator,
        conversations,
        storage,
    }
}

impl Harness {
    /// Make the database refuse assistant messages whose content matches `pattern`.
    async fn reject_assistant_messages(&self, pattern: &str) {
        let trigger = format!(
            "CREATE TRIGGER reject_answer BEFORE INSERT ON message \
             WHEN NEW.role = 'ASSISTANT' AND NEW.content LIKE '{pattern}' \
             BEGIN SELECT RAISE(ABORT, 'answer rejected'); END"
        );
        sqlx::query(&trigger)
            .execute(self.storage.pool())
            .await
            .unwrap();
    }

    async fn status(&self) -> ConversationStatus {
        self.conversations
            .conversation_for_issue(REPO, 7)
            .await
            .unwrap()
            .expect("conversation should exist")
            .status
    }

    async fn roles(&self) -> Vec<MessageRole> {
        let conversation = self
            .conversations
            .conversation_for_issue(REPO, 7)
            .await
            .unwrap()
            .expect("conversation should exist");
        self.conversations
            .list_messages(&conversation.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.role)
            .collect()
    }
}

fn readme_blob() -> VcsResult<Vec<FileBlob>> {
    Ok(vec![FileBlob {
        path: "README.md".to_string(),
        contents: String::new(),
    }])
}

#[tokio::test]
async fn test_successful_conversation_records_every_message() {
    let mut llm = MockLlm::new();
    answer_files(&mut llm, || Ok(FILES_ANSWER.to_string()));
    answer_plan(&mut llm, || Ok(PLAN_ANSWER.to_string()));

    let mut vcs = vcs_with_tree();
    vcs.expect_fetch_file_blobs()
        .withf(|repo, paths| repo == REPO && paths.len() == 1 && paths[0] == "README.md")
        .times(1)
        .returning(|_, _| readme_blob());

    let h = harness(llm, vcs).await;
    let solution = h.orchestrator.produce_issue_solution(REPO, &issue()).await.unwrap();

    assert_eq!(solution.plan.pull_request_title, "Update readme");
    assert_eq!(solution.plan.updated_files[0].change_type, ChangeType::Modify);
    assert_eq!(h.status().await, ConversationStatus::Completed);
    assert_eq!(
        h.roles().await,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
            MessageRole::Assistant,
        ]
    );

    let messages = h.conversations.list_messages(&solution.conversation_id).await.unwrap();
    assert!(messages[0].content.contains(REPO));
    assert!(messages[1].content.contains("User = person \"User\" \"null\""));
    assert!(messages[1].content.contains("src/main.rs"));
    assert_eq!(messages[2].content, FILES_ANSWER);
    assert!(messages[3].content.contains("## README.md"));
}

#[tokio::test]
async fn test_first_round_failure_marks_failed() {
    let mut llm = MockLlm::new();
    answer_files(&mut llm, || {
        Err(LlmError::Refused {
            message: "policy".to_string(),
        })
    });

    let h = harness(llm, vcs_with_tree()).await;
    let err = h
        .orchestrator
        .produce_issue_solution(REPO, &issue())
        .await
        .unwrap_err();

    match &err {
        AppError::ConversationFailed { stage, source, .. } => {
            assert_eq!(*stage, "after the first user message");
            assert!(matches!(**source, AppError::Llm(LlmError::Refused { .. })));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.status().await, ConversationStatus::Failed);
    assert_eq!(h.roles().await, vec![MessageRole::System, MessageRole::User]);
}

#[tokio::test]
async fn test_file_fetch_failure_marks_failed() {
    let mut llm = MockLlm::new();
    answer_files(&mut llm, || Ok(FILES_ANSWER.to_string()));

    let mut vcs = vcs_with_tree();
    vcs.expect_fetch_file_blobs().times(1).returning(|_, _| {
        Err(VcsError::Api {
            status: 404,
            message: "Not Found".to_string(),
        })
    });

    let h = harness(llm, vcs).await;
    let err = h
        .orchestrator
        .produce_issue_solution(REPO, &issue())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::ConversationFailed {
            stage: "while fetching requested files",
            ..
        }
    ));
    assert_eq!(h.status().await, ConversationStatus::Failed);
    assert_eq!(h.roles().await.len(), 3);
}

#[tokio::test]
async fn test_second_round_failure_marks_failed() {
    let mut llm = MockLlm::new();
    answer_files(&mut llm, || Ok(FILES_ANSWER.to_string()));
    answer_plan(&mut llm, || {
        Err(LlmError::TooLong {
            message: "token limit".to_string(),
        })
    });

    let mut vcs = vcs_with_tree();
    vcs.expect_fetch_file_blobs().returning(|_, _| readme_blob());

    let h = harness(llm, vcs).await;
    let err = h
        .orchestrator
        .produce_issue_solution(REPO, &issue())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("after the second user message"));
    assert_eq!(h.status().await, ConversationStatus::Failed);
    assert_eq!(
        h.roles().await,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
        ]
    );
}

#[tokio::test]
async fn test_plan_not_matching_schema_marks_failed() {
    let mut llm = MockLlm::new();
    answer_files(&mut llm, || Ok(FILES_ANSWER.to_string()));
    answer_plan(&mut llm, || Ok(r#"{"pullRequestTitle":"x"}"#.to_string()));

    let mut vcs = vcs_with_tree();
    vcs.expect_fetch_file_blobs().returning(|_, _| readme_blob());

    let h = harness(llm, vcs).await;
    let err = h
        .orchestrator
        .produce_issue_solution(REPO, &issue())
        .await
        .unwrap_err();

    match err {
        AppError::ConversationFailed { source, .. } => {
            assert!(matches!(*source, AppError::Llm(LlmError::MalformedOutput { .. })));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.status().await, ConversationStatus::Failed);
}

#[tokio::test]
async fn test_second_conversation_for_issue_conflicts() {
    let mut llm = MockLlm::new();
    answer_files(&mut llm, || Ok(FILES_ANSWER.to_string()));
    answer_plan(&mut llm, || Ok(PLAN_ANSWER.to_string()));

    let mut vcs = vcs_with_tree();
    vcs.expect_fetch_file_blobs().returning(|_, _| readme_blob());

    let h = harness(llm, vcs).await;
    h.orchestrator.produce_issue_solution(REPO, &issue()).await.unwrap();

    let err = h
        .orchestrator
        .produce_issue_solution(REPO, &issue())
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(h.status().await, ConversationStatus::Completed);
}

#[tokio::test]
async fn test_unknown_repository_is_not_found() {
    let mut llm = MockLlm::new();
    llm.expect_structured_query().times(0);
    let mut vcs = MockVcs::new();
    vcs.expect_fetch_file_tree().times(0);

    let h = harness(llm, vcs).await;
    let err = h
        .orchestrator
        .produce_issue_solution("acme/unknown", &issue())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(h.conversations.list_conversations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_recording_first_answer_marks_failed() {
    let mut llm = MockLlm::new();
    answer_files(&mut llm, || Ok(FILES_ANSWER.to_string()));

    let mut vcs = vcs_with_tree();
    vcs.expect_fetch_file_blobs().times(0);

    let h = harness(llm, vcs).await;
    h.reject_assistant_messages("%fileList%").await;
    let err = h
        .orchestrator
        .produce_issue_solution(REPO, &issue())
        .await
        .unwrap_err();

    match &err {
        AppError::ConversationFailed { stage, source, .. } => {
            assert_eq!(*stage, "while recording the first answer");
            assert!(matches!(**source, AppError::Storage(_)));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.status().await, ConversationStatus::Failed);
    assert_eq!(h.roles().await, vec![MessageRole::System, MessageRole::User]);
}

#[tokio::test]
async fn test_failure_completing_conversation_marks_failed() {
    let mut llm = MockLlm::new();
    answer_files(&mut llm, || Ok(FILES_ANSWER.to_string()));
    answer_plan(&mut llm, || Ok(PLAN_ANSWER.to_string()));

    let mut vcs = vcs_with_tree();
    vcs.expect_fetch_file_blobs().returning(|_, _| readme_blob());

    let h = harness(llm, vcs).await;
    h.reject_assistant_messages("%pullRequestTitle%").await;
    let err = h
        .orchestrator
        .produce_issue_solution(REPO, &issue())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::ConversationFailed {
            stage: "while completing the conversation",
            ..
        }
    ));
    assert_eq!(h.status().await, ConversationStatus::Failed);
    assert_eq!(
        h.roles().await,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
        ]
    );
}
