//! Integration tests for importing, exporting and initializing models.

use c4_issue_assistant::error::{AppError, StorageError};
use c4_issue_assistant::model::ModelManager;
use c4_issue_assistant::notation;
use c4_issue_assistant::storage::{ElementKind, Repository, SqliteStorage};
use pretty_assertions::assert_eq;

const WEATHER_APP: &str = r#"workspace "My-weather-app" "A simple weather app."{
!impliedRelationships false
model {
    u = person "User"
    ss = softwareSystem "Software System" {
        wa = container "Web Application" {
            cont = component "Controllers"
            dba = component "Database Access"
            serviceLayer = component "Business logic"
        }
        db = container "Database Schema" {
            tags "Database"
        }
    }
    wa -> db "Reads from and writes to"
    serviceLayer -> dba "Converts raw database output to JSON"
    cont -> u "Send and receive HTTP traffic"
    cont -> serviceLayer "Calls functions corresponding to user requests"
    dba -> db "Compiles and executes queries"
}
}
"#;

async fn setup() -> (SqliteStorage, ModelManager) {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let manager = ModelManager::new(storage.clone());
    (storage, manager)
}

async fn register(storage: &SqliteStorage, name: &str) -> Repository {
    let repo = Repository::new(name, format!("https://github.com/{}", name));
    let mut uow = storage.begin().await.unwrap();
    uow.write_repository(&repo).await.unwrap();
    uow.commit().await.unwrap();
    repo
}

async fn count(storage: &SqliteStorage, table: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(storage.pool())
        .await
        .unwrap();
    n
}

#[cfg(test)]
mod import_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_import_stores_forest_and_relationships() {
        let (storage, manager) = setup().await;
        register(&storage, "some-dev/my-weather-app").await;

        let summary = manager
            .import_notation("some-dev/my-weather-app", WEATHER_APP)
            .await
            .unwrap();
        assert_eq!(summary.elements, 7);
        assert_eq!(summary.relationships, 5);

        let workspace = storage
            .get_workspace_for_repo("some-dev/my-weather-app")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(workspace.name, "My-weather-app");
        assert_eq!(workspace.id, summary.workspace_id);

        let elements = storage.get_elements(&workspace.id).await.unwrap();
        let by_name = |name: &str| elements.iter().find(|e| e.name == name).unwrap();
        let web = by_name("Web Application");
        assert_eq!(web.kind, ElementKind::Container);
        assert_eq!(web.parent_id.as_deref(), Some(by_name("Software System").id.as_str()));
        assert_eq!(
            by_name("Controllers").parent_id.as_deref(),
            Some(web.id.as_str())
        );
        // parser identifiers never reach the store
        assert!(elements.iter().all(|e| e.id != "wa" && e.id.len() == 36));

        let relationships = storage.get_relationships(&workspace.id).await.unwrap();
        assert_eq!(relationships[0].source_name, "Web Application");
        assert_eq!(relationships[0].destination_name, "Database Schema");
    }

    #[tokio::test]
    async fn test_import_unknown_repository_is_not_found() {
        let (storage, manager) = setup().await;

        let err = manager
            .import_notation("unknown-repo", "workspace \"blank\" \"still valid\" {\n}\n")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Storage(StorageError::NotFound { entity: "Repository", .. })
        ));
        assert_eq!(err.to_string(), "Storage error: Repository not found: unknown-repo");
        assert_eq!(count(&storage, "workspace").await, 0);
    }

    #[tokio::test]
    async fn test_parse_error_leaves_store_untouched() {
        let (storage, manager) = setup().await;
        register(&storage, "acme/shop").await;
        manager.import_notation("acme/shop", WEATHER_APP).await.unwrap();
        let before = manager.export_notation("acme/shop").await.unwrap();

        let err = manager
            .import_notation("acme/shop", "workspace \"W\" {\n model {\n  a -> b\n")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Notation(_)));

        assert_eq!(manager.export_notation("acme/shop").await.unwrap(), before);
        assert_eq!(count(&storage, "workspace").await, 1);
    }

    #[tokio::test]
    async fn test_reimport_replaces_previous_workspace() {
        let (storage, manager) = setup().await;
        register(&storage, "acme/shop").await;

        let first = manager.import_notation("acme/shop", WEATHER_APP).await.unwrap();
        let second = manager
            .import_notation(
                "acme/shop",
                "workspace \"Small\" {\n model {\n  u = person \"User\"\n }\n}\n",
            )
            .await
            .unwrap();

        assert_ne!(first.workspace_id, second.workspace_id);
        assert_eq!(count(&storage, "workspace").await, 1);
        assert_eq!(count(&storage, "element").await, 1);
        assert_eq!(count(&storage, "relationship").await, 0);
    }
}

#[cfg(test)]
mod export_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_export_single_person() {
        let (storage, manager) = setup().await;
        register(&storage, "acme/app").await;
        manager
            .import_notation(
                "acme/app",
                "workspace \"W\" {\n model {\n  u = person \"User\"\n }\n}\n",
            )
            .await
            .unwrap();

        let text = manager.export_notation("acme/app").await.unwrap();
        assert_eq!(
            text,
            "workspace \"W\" {\n    model {\n        User = person \"User\" \"null\"\n    }\n}\n"
        );
    }

    #[tokio::test]
    async fn test_export_renders_nesting_and_relationships() {
        let (storage, manager) = setup().await;
        register(&storage, "acme/app").await;
        manager.import_notation("acme/app", WEATHER_APP).await.unwrap();

        let text = manager.export_notation("acme/app").await.unwrap();
        let expected = r#"workspace "My-weather-app" "A simple weather app." {
    model {
        User = person "User" "null"
        Software-System = softwareSystem "Software System" "null" {
            Web-Application = container "Web Application" "null" {
                Controllers = component "Controllers" "null"
                Database-Access = component "Database Access" "null"
                Business-logic = component "Business logic" "null"
            }
            Database-Schema = container "Database Schema" "null"
        }
        Web-Application -> Database-Schema "Reads from and writes to"
        Business-logic -> Database-Access "Converts raw database output to JSON"
        Controllers -> User "Send and receive HTTP traffic"
        Controllers -> Business-logic "Calls functions corresponding to user requests"
        Database-Access -> Database-Schema "Compiles and executes queries"
    }
}
"#;
        assert_eq!(text, expected);
    }

    #[tokio::test]
    async fn test_export_round_trips_through_parser() {
        let (storage, manager) = setup().await;
        register(&storage, "acme/app").await;
        manager.import_notation("acme/app", WEATHER_APP).await.unwrap();

        let exported = manager.export_notation("acme/app").await.unwrap();
        manager.import_notation("acme/app", &exported).await.unwrap();
        assert_eq!(manager.export_notation("acme/app").await.unwrap(), exported);

        let reparsed = notation::parse(&exported).unwrap();
        assert_eq!(reparsed.elements.len(), 7);
        assert_eq!(reparsed.relationships.len(), 5);
    }

    #[tokio::test]
    async fn test_export_missing_repository_and_workspace() {
        let (storage, manager) = setup().await;

        let err = manager.export_notation("nobody/nothing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Storage error: Repository not found: nobody/nothing");

        register(&storage, "acme/bare").await;
        let err = manager.export_notation("acme/bare").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Storage error: Workspace for repository not found: acme/bare"
        );
    }
}

#[cfg(test)]
mod initialize_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_initialize_creates_repository() {
        let (storage, manager) = setup().await;

        manager
            .initialize_repo(
                "some-coder/my-weather-app",
                "https://github.com/some-coder/my-weather-app",
                WEATHER_APP,
            )
            .await
            .unwrap();

        let repo = storage
            .get_repository("some-coder/my-weather-app")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repo.url, "https://github.com/some-coder/my-weather-app");
        assert!(repo.workspace_id.is_some());
        assert_eq!(count(&storage, "element").await, 7);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (storage, manager) = setup().await;
        let url = "https://github.com/acme/app";

        manager.initialize_repo("acme/app", url, WEATHER_APP).await.unwrap();
        let first = manager.export_notation("acme/app").await.unwrap();
        manager.initialize_repo("acme/app", url, WEATHER_APP).await.unwrap();
        let second = manager.export_notation("acme/app").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(count(&storage, "github_repository").await, 1);
        assert_eq!(count(&storage, "workspace").await, 1);
        assert_eq!(count(&storage, "element").await, 7);
        assert_eq!(count(&storage, "relationship").await, 5);
    }

    #[tokio::test]
    async fn test_initialize_with_bad_text_creates_nothing() {
        let (storage, manager) = setup().await;

        let err = manager
            .initialize_repo("acme/app", "https://github.com/acme/app", "workspace {")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Notation(_)));
        assert_eq!(count(&storage, "github_repository").await, 0);
    }
}
