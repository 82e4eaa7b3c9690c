//! Task persistence.
//!
//! [`TaskStore`] is the contract the mutation engine needs from a document
//! store: scoped lookups and one atomic find-and-update per task. [`JsonStore`]
//! implements it on top of a single JSON file and doubles as the registry,
//! relation-graph and notification-outbox collaborator for local use.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::db::{Database, OperatorSite, OutboxEntry};
use crate::error::{CollaboratorError, StoreError};
use crate::location::{GeoRegistry, OperatorSiteSync, RegistryScope, Station};
use crate::notify::{AssignmentNotice, NoticeContext, Notifier, StatusChangeNotice};
use crate::patch::TaskUpdate;
use crate::relations::RelationGraph;
use crate::task::{Organization, Project, Recipient, Task};

/// Storage contract for tasks and the documents that scope them.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find_organization(&self, org_id: &str) -> Result<Option<Organization>, StoreError>;

    async fn find_project(&self, org_id: &str, project_id: &str)
        -> Result<Option<Project>, StoreError>;

    /// Find a task by internal id or by code (case-insensitive) within a project.
    async fn find_task(
        &self,
        org_id: &str,
        project_id: &str,
        task_ref: &str,
    ) -> Result<Option<Task>, StoreError>;

    /// Atomically apply `update` to the task with internal id `task_id` and
    /// return the task as stored afterwards. On error nothing is applied.
    async fn commit(&self, task_id: &str, update: &TaskUpdate) -> Result<Task, StoreError>;
}

/// JSON-file document store. With no path it lives only in memory.
pub struct JsonStore {
    path: Option<PathBuf>,
    db: Mutex<Database>,
}

impl JsonStore {
    /// Open (or start) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::load(path)?;
        Ok(JsonStore {
            path: Some(path.to_path_buf()),
            db: Mutex::new(db),
        })
    }

    pub fn in_memory(db: Database) -> Self {
        JsonStore { path: None, db: Mutex::new(db) }
    }

    /// A copy of the current database contents.
    pub async fn snapshot(&self) -> Database {
        self.db.lock().await.clone()
    }

    /// Run `change` under the lock and persist the result. If either the change
    /// or the save fails, the in-memory database is restored.
    async fn write<R>(
        &self,
        change: impl FnOnce(&mut Database) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut db = self.db.lock().await;
        let before = db.clone();
        let result = change(&mut *db).and_then(|r| {
            if let Some(path) = &self.path {
                db.save(path)?;
            }
            Ok(r)
        });
        if result.is_err() {
            *db = before;
        }
        result
    }

    async fn push_outbox(
        &self,
        kind: &str,
        recipients: Vec<Recipient>,
        context: &NoticeContext,
        details: Option<serde_json::Value>,
    ) -> Result<(), CollaboratorError> {
        let entry = OutboxEntry {
            kind: kind.to_string(),
            recipients,
            org_id: context.org_id.clone(),
            project_id: context.project_id.clone(),
            task_id: context.task_id.clone(),
            task_code: context.task_code.clone(),
            triggered_by: context.triggered_by.id.clone(),
            details,
            created_at: Utc::now(),
        };
        self.write(|db| {
            db.outbox.push(entry);
            Ok(())
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonStore {
    async fn find_organization(&self, org_id: &str) -> Result<Option<Organization>, StoreError> {
        Ok(self.db.lock().await.organization(org_id).cloned())
    }

    async fn find_project(
        &self,
        org_id: &str,
        project_id: &str,
    ) -> Result<Option<Project>, StoreError> {
        Ok(self.db.lock().await.project(org_id, project_id).cloned())
    }

    async fn find_task(
        &self,
        org_id: &str,
        project_id: &str,
        task_ref: &str,
    ) -> Result<Option<Task>, StoreError> {
        Ok(self
            .db
            .lock()
            .await
            .resolve_task(org_id, project_id, task_ref)
            .cloned())
    }

    #[instrument(
        skip(self, update),
        fields(
            fields = update.set.len() + update.unset.len(),
            events = update.push_events.len()
        )
    )]
    async fn commit(&self, task_id: &str, update: &TaskUpdate) -> Result<Task, StoreError> {
        let now = Utc::now();
        self.write(|db| db.apply_update(task_id, update, now)).await
    }
}

#[async_trait]
impl GeoRegistry for JsonStore {
    async fn find_station(
        &self,
        scope: &RegistryScope,
        bs_number: &str,
    ) -> Result<Option<Station>, CollaboratorError> {
        let db = self.db.lock().await;
        Ok(db
            .stations
            .iter()
            .find(|s| &s.scope == scope && s.bs_number == bs_number)
            .cloned())
    }

    async fn upsert_station(&self, station: &Station) -> Result<(), CollaboratorError> {
        let station = station.clone();
        self.write(|db| {
            match db
                .stations
                .iter_mut()
                .find(|s| s.scope == station.scope && s.bs_number == station.bs_number)
            {
                Some(existing) => *existing = station,
                None => db.stations.push(station),
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn sync_operator_sites(
        &self,
        scope: &RegistryScope,
        sync: &OperatorSiteSync,
    ) -> Result<(), CollaboratorError> {
        let now = Utc::now();
        self.write(|db| {
            for location in &sync.locations {
                let entry = OperatorSite {
                    scope: scope.clone(),
                    bs_number: sync.bs_number.clone(),
                    location: location.clone(),
                    task_id: sync.task_id.clone(),
                    task_code: sync.task_code.clone(),
                    updated_at: now,
                };
                match db
                    .operator_sites
                    .iter_mut()
                    .find(|s| &s.scope == scope && s.location.name == location.name)
                {
                    Some(existing) => *existing = entry,
                    None => db.operator_sites.push(entry),
                }
            }
            Ok(())
        })
        .await?;
        debug!(sites = sync.locations.len(), "Operator site collection synced");
        Ok(())
    }
}

#[async_trait]
impl RelationGraph for JsonStore {
    async fn add_reverse_edge(
        &self,
        target_id: &str,
        source_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.write(|db| {
            let target = db
                .get_mut(target_id)
                .ok_or_else(|| StoreError::MissingTask(target_id.to_string()))?;
            if !target.related_tasks.iter().any(|id| id == source_id) {
                target.related_tasks.push(source_id.to_string());
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn remove_reverse_edge(
        &self,
        target_id: &str,
        source_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.write(|db| {
            let target = db
                .get_mut(target_id)
                .ok_or_else(|| StoreError::MissingTask(target_id.to_string()))?;
            target.related_tasks.retain(|id| id != source_id);
            Ok(())
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for JsonStore {
    async fn send_assigned(&self, notice: &AssignmentNotice) -> Result<(), CollaboratorError> {
        self.push_outbox("assigned", vec![notice.recipient.clone()], &notice.context, None)
            .await
    }

    async fn send_unassigned(&self, notice: &AssignmentNotice) -> Result<(), CollaboratorError> {
        self.push_outbox("unassigned", vec![notice.recipient.clone()], &notice.context, None)
            .await
    }

    async fn send_status_changed(
        &self,
        notice: &StatusChangeNotice,
    ) -> Result<(), CollaboratorError> {
        let details = json!({ "from": notice.from, "to": notice.to });
        let recipients = notice.recipients.clone();
        self.push_outbox("status_changed", recipients, &notice.context, Some(details))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> JsonStore {
        let mut db = Database::default();
        db.organizations.push(Organization { id: "o1".into(), name: "Org".into() });
        db.projects.push(Project {
            id: "p1".into(),
            org_id: "o1".into(),
            name: "North".into(),
            operator: Some("t2".into()),
            region: None,
        });
        db.tasks.push(Task::new("a", "A-1", "o1", "p1", "A"));
        db.tasks.push(Task::new("b", "B-1", "o1", "p1", "B"));
        JsonStore::in_memory(db)
    }

    #[tokio::test]
    async fn test_lookups_are_scoped() {
        let s = store();
        assert!(s.find_organization("o1").await.unwrap().is_some());
        assert!(s.find_project("o2", "p1").await.unwrap().is_none());
        assert_eq!(s.find_task("o1", "p1", "a-1").await.unwrap().unwrap().id, "a");
        assert!(s.find_task("o1", "p2", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_store_untouched() {
        let s = store();
        let mut update = TaskUpdate::default();
        update.set("relatedTasks", json!(42));
        assert!(s.commit("a", &update).await.is_err());
        assert_eq!(s.snapshot().await.get("a").unwrap().related_tasks, Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_reverse_edges_are_idempotent() {
        let s = store();
        s.add_reverse_edge("b", "a").await.unwrap();
        s.add_reverse_edge("b", "a").await.unwrap();
        assert_eq!(s.snapshot().await.get("b").unwrap().related_tasks, vec!["a".to_string()]);
        s.remove_reverse_edge("b", "a").await.unwrap();
        assert!(s.snapshot().await.get("b").unwrap().related_tasks.is_empty());
        assert!(s.add_reverse_edge("zzz", "a").await.is_err());
    }

    #[tokio::test]
    async fn test_station_upsert_replaces_within_scope() {
        let s = store();
        let scope = RegistryScope { operator: Some("t2".into()), region: None };
        let mut station = Station {
            bs_number: "1234".into(),
            scope: scope.clone(),
            coordinates: "55 37".into(),
            latitude: Some(55.0),
            longitude: Some(37.0),
            address: "x".into(),
        };
        s.upsert_station(&station).await.unwrap();
        station.coordinates = "56 38".into();
        s.upsert_station(&station).await.unwrap();
        let found = s.find_station(&scope, "1234").await.unwrap().unwrap();
        assert_eq!(found.coordinates, "56 38");
        assert!(s.find_station(&RegistryScope::default(), "1234").await.unwrap().is_none());
        assert_eq!(s.snapshot().await.stations.len(), 1);
    }

    #[tokio::test]
    async fn test_file_backed_commit_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        store().snapshot().await.save(&path).unwrap();

        let s = JsonStore::open(&path).unwrap();
        let mut update = TaskUpdate::default();
        update.set("taskName", json!("Renamed"));
        s.commit("a", &update).await.unwrap();

        let reloaded = Database::load(&path).unwrap();
        assert_eq!(reloaded.get("a").unwrap().task_name, "Renamed");
    }
}
