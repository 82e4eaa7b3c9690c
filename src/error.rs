//! Error types for the store, downstream collaborators and the mutation entry point.

use thiserror::Error;

/// Errors raised by a task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("document error: {0}")]
    Document(#[from] serde_json::Error),
    /// The document disappeared between lookup and update.
    #[error("task {0} not found")]
    MissingTask(String),
}

/// A downstream collaborator call failed. Never surfaced to the caller of a
/// mutation; logged by the fan-out runner instead.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What `apply_task_patch` can report to its caller.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("organization {0} not found")]
    OrganizationNotFound(String),
    #[error("project {project_id} not found in organization {org_id}")]
    ProjectNotFound { org_id: String, project_id: String },
    #[error("task {task_ref} not found in project {project_id}")]
    TaskNotFound { project_id: String, task_ref: String },
    /// The read or the atomic patch-and-commit failed; nothing was applied.
    #[error("task storage failed: {0}")]
    Commit(#[from] StoreError),
}

impl MutationError {
    /// Whether this is a not-found condition rather than a server-side failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MutationError::OrganizationNotFound(_)
                | MutationError::ProjectNotFound { .. }
                | MutationError::TaskNotFound { .. }
        )
    }
}
