//! Moves architecture models between notation text and the store.

use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppResult, StorageError, StorageResult};
use crate::notation::{self, NotationElement, NotationModel, NotationRelationship, WorkspaceMeta};
use crate::storage::{GraphElement, Relationship, Repository, SqliteStorage, UnitOfWork, Workspace};

/// Parser-local identifiers mapped to fresh store ids, for one import.
struct IdMap {
    ids: HashMap<String, String>,
}

impl IdMap {
    fn assign(elements: &[NotationElement]) -> Self {
        let ids = elements
            .iter()
            .map(|e| (e.id.clone(), Uuid::new_v4().to_string()))
            .collect();
        Self { ids }
    }

    fn resolve(&self, parsed_id: &str) -> StorageResult<String> {
        self.ids
            .get(parsed_id)
            .cloned()
            .ok_or_else(|| StorageError::Query {
                message: format!("element '{}' has no assigned id", parsed_id),
            })
    }
}

/// Counts reported after a model is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    /// Id of the newly linked workspace.
    pub workspace_id: String,
    /// Elements written.
    pub elements: usize,
    /// Relationships written.
    pub relationships: usize,
}

/// Imports, exports and (re)initializes repository models.
#[derive(Clone)]
pub struct ModelManager {
    storage: SqliteStorage,
}

impl ModelManager {
    /// Create a manager over the given store.
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    /// Render the model linked to `repo_name` as notation text.
    pub async fn export_notation(&self, repo_name: &str) -> AppResult<String> {
        let Some(workspace) = self.storage.get_workspace_for_repo(repo_name).await? else {
            let entity = match self.storage.get_repository(repo_name).await? {
                Some(_) => "Workspace for repository",
                None => "Repository",
            };
            return Err(StorageError::NotFound {
                entity,
                key: repo_name.to_string(),
            }
            .into());
        };

        let elements = self.storage.get_elements(&workspace.id).await?;
        let relationships = self.storage.get_relationships(&workspace.id).await?;
        debug!(
            repo = %repo_name,
            workspace_id = %workspace.id,
            elements = elements.len(),
            relationships = relationships.len(),
            "Exporting model"
        );

        let model = NotationModel {
            workspace: WorkspaceMeta {
                name: workspace.name,
                description: workspace.description,
            },
            elements: elements
                .into_iter()
                .map(|e| NotationElement {
                    id: e.id,
                    parent_id: e.parent_id,
                    kind: e.kind,
                    name: e.name,
                    description: e.description,
                })
                .collect(),
            relationships: relationships
                .into_iter()
                .map(|r| NotationRelationship {
                    source_id: r.source_id,
                    destination_id: r.destination_id,
                    description: r.description,
                })
                .collect(),
        };

        Ok(notation::render(&model))
    }

    /// Parse `text` and store it as the model of an existing repository.
    ///
    /// A workspace already linked to the repository is replaced. Nothing is
    /// written when the repository is unknown or the text does not parse.
    pub async fn import_notation(&self, repo_name: &str, text: &str) -> AppResult<ImportSummary> {
        let mut uow = self.storage.begin().await?;
        let Some(repository) = uow.repository(repo_name).await? else {
            return Err(StorageError::NotFound {
                entity: "Repository",
                key: repo_name.to_string(),
            }
            .into());
        };
        let model = notation::parse(text)?;

        let summary = Self::replace_model(&mut uow, &repository, &model).await?;
        uow.commit().await?;

        info!(
            repo = %repo_name,
            workspace_id = %summary.workspace_id,
            elements = summary.elements,
            relationships = summary.relationships,
            "Model imported"
        );
        Ok(summary)
    }

    /// Create the repository if needed and store `text` as its model.
    ///
    /// Idempotent: running it twice with the same input leaves one repository
    /// and one linked workspace with the same content.
    pub async fn initialize_repo(
        &self,
        repo_name: &str,
        repo_url: &str,
        text: &str,
    ) -> AppResult<ImportSummary> {
        let model = notation::parse(text)?;

        let mut uow = self.storage.begin().await?;
        let repository = match uow.repository(repo_name).await? {
            Some(repository) => repository,
            None => {
                let repository = Repository::new(repo_name, repo_url);
                uow.write_repository(&repository).await?;
                info!(repo = %repo_name, "Repository registered");
                repository
            }
        };

        let summary = Self::replace_model(&mut uow, &repository, &model).await?;
        uow.commit().await?;

        info!(
            repo = %repo_name,
            workspace_id = %summary.workspace_id,
            elements = summary.elements,
            "Repository initialized"
        );
        Ok(summary)
    }

    /// Tear down any linked workspace, then write `model` as a new one.
    async fn replace_model(
        uow: &mut UnitOfWork,
        repository: &Repository,
        model: &NotationModel,
    ) -> AppResult<ImportSummary> {
        if let Some(old) = &repository.workspace_id {
            let relationships = uow.delete_workspace_relationships(old).await?;
            let elements = uow.delete_workspace_elements(old).await?;
            uow.unlink_repo(&repository.id).await?;
            uow.delete_workspace(old).await?;
            debug!(
                workspace_id = %old,
                elements,
                relationships,
                "Previous workspace removed"
            );
        }

        let workspace = Workspace::new(&model.workspace.name)
            .with_description(model.workspace.description.clone());
        let ids = IdMap::assign(&model.elements);

        let elements = model
            .elements
            .iter()
            .map(|e| {
                Ok(GraphElement {
                    id: ids.resolve(&e.id)?,
                    parent_id: e.parent_id.as_deref().map(|p| ids.resolve(p)).transpose()?,
                    kind: e.kind,
                    name: e.name.clone(),
                    description: e.description.clone(),
                    workspace_id: workspace.id.clone(),
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let relationships = model
            .relationships
            .iter()
            .map(|r| {
                Ok(Relationship {
                    source_id: ids.resolve(&r.source_id)?,
                    destination_id: ids.resolve(&r.destination_id)?,
                    description: r.description.clone(),
                    workspace_id: workspace.id.clone(),
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        uow.write_workspace(&workspace).await?;
        uow.link_repo_to_workspace(&repository.id, &workspace.id)
            .await?;
        uow.write_elements(&elements).await?;
        uow.write_relationships(&relationships).await?;

        Ok(ImportSummary {
            workspace_id: workspace.id,
            elements: elements.len(),
            relationships: relationships.len(),
        })
    }
}
