//! Applying a partial update to a task.
//!
//! One mutation goes through `load -> normalize -> diff -> commit -> fan out`.
//! Anything before the commit can abort the request; nothing after it can. The
//! commit is a single atomic update carrying the changed fields and the new
//! event log entries. Registry and relation syncs are awaited after the commit,
//! notifications are best-effort.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::diff::ChangeSet;
use crate::error::MutationError;
use crate::fanout::{FanOut, FanOutReport};
use crate::location::{
    map_point, resolve_after_number_change, GeoRegistry, RegistryScope, SiteInput, SiteSync,
};
use crate::normalize::*;
use crate::notify::{plan_notifications, queue_notifications, Notifier};
use crate::patch::{Patch, TaskPatch, TaskUpdate};
use crate::relations::{RelationDelta, RelationGraph};
use crate::state::{derive_transition, ExecutorChange, Transition};
use crate::store::{JsonStore, TaskStore};
use crate::task::{Actor, EventAction, Project, Task, TaskEvent};

/// Knobs for the post-commit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationOptions {
    /// Spawn notification delivery instead of awaiting it.
    pub detach_notifications: bool,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self { detach_notifications: true }
    }
}

/// Everything a mutation produced.
#[derive(Debug)]
pub struct MutationOutcome {
    /// The task as committed (or as stored, when nothing changed).
    pub task: Task,
    pub changes: ChangeSet,
    pub transition: Transition,
    /// Registry and relation syncs.
    pub sync_report: FanOutReport,
    /// Notification delivery, when it was awaited.
    pub notification_report: Option<FanOutReport>,
    /// Notification delivery still running in the background. A short-lived
    /// host should await it before shutting its runtime down.
    pub pending_notifications: Option<JoinHandle<FanOutReport>>,
}

/// The task mutation engine.
pub struct TaskMutator {
    store: Arc<dyn TaskStore>,
    registry: Arc<dyn GeoRegistry>,
    relations: Arc<dyn RelationGraph>,
    notifier: Arc<dyn Notifier>,
    options: MutationOptions,
}

impl TaskMutator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<dyn GeoRegistry>,
        relations: Arc<dyn RelationGraph>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            registry,
            relations,
            notifier,
            options: MutationOptions::default(),
        }
    }

    /// A mutator whose every collaborator is the given JSON store.
    pub fn with_json_store(store: Arc<JsonStore>) -> Self {
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }

    #[must_use]
    pub fn with_options(mut self, options: MutationOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply `patch` to the task `task_ref` (internal id or code) and return
    /// the updated task. Fan-out failures are logged, never returned.
    ///
    /// # Errors
    ///
    /// A not-found error when the organisation, project or task does not
    /// resolve, or [`MutationError::Commit`] when storage fails.
    pub async fn apply_task_patch(
        &self,
        org_id: &str,
        project_id: &str,
        task_ref: &str,
        actor: &Actor,
        patch: &TaskPatch,
    ) -> Result<Task, MutationError> {
        self.apply(org_id, project_id, task_ref, actor, patch)
            .await
            .map(|outcome| outcome.task)
    }

    /// Like [`TaskMutator::apply_task_patch`] but also returns the diff,
    /// transition and fan-out reports.
    ///
    /// # Errors
    ///
    /// See [`TaskMutator::apply_task_patch`].
    #[instrument(skip(self, actor, patch), fields(actor_id = %actor.id))]
    pub async fn apply(
        &self,
        org_id: &str,
        project_id: &str,
        task_ref: &str,
        actor: &Actor,
        patch: &TaskPatch,
    ) -> Result<MutationOutcome, MutationError> {
        let (project, current) = self.load(org_id, project_id, task_ref).await?;
        let plan = self.plan(&project, &current, actor, patch, Utc::now()).await;

        if plan.update.is_empty() {
            debug!(task_id = %current.id, "Patch changes nothing, skipping commit");
            return Ok(MutationOutcome {
                task: current,
                changes: plan.changes,
                transition: plan.transition,
                sync_report: FanOutReport::default(),
                notification_report: None,
                pending_notifications: None,
            });
        }

        let committed = self.store.commit(&current.id, &plan.update).await?;
        info!(
            task_id = %committed.id,
            task_code = %committed.code,
            changes = plan.changes.len(),
            status = %committed.status,
            "Task patched"
        );

        let mut sync = FanOut::new(&committed.id, &committed.code);
        if let Some(site_sync) = plan.site_sync {
            site_sync.queue(&mut sync, &self.registry);
        }
        plan.relations.queue(&mut sync, &self.relations, &committed.id);
        let sync_report = sync.run().await;

        let mut notify = FanOut::new(&committed.id, &committed.code);
        queue_notifications(
            &mut notify,
            &self.notifier,
            plan_notifications(&current, &committed, plan.executor, actor),
        );
        let (notification_report, pending_notifications) = if notify.is_empty() {
            (None, None)
        } else if self.options.detach_notifications {
            (None, Some(notify.detach()))
        } else {
            (Some(notify.run().await), None)
        };

        Ok(MutationOutcome {
            task: committed,
            changes: plan.changes,
            transition: plan.transition,
            sync_report,
            notification_report,
            pending_notifications,
        })
    }

    async fn load(
        &self,
        org_id: &str,
        project_id: &str,
        task_ref: &str,
    ) -> Result<(Project, Task), MutationError> {
        self.store
            .find_organization(org_id)
            .await?
            .ok_or_else(|| MutationError::OrganizationNotFound(org_id.to_string()))?;
        let project = self
            .store
            .find_project(org_id, project_id)
            .await?
            .ok_or_else(|| MutationError::ProjectNotFound {
                org_id: org_id.to_string(),
                project_id: project_id.to_string(),
            })?;
        let task = self
            .store
            .find_task(org_id, project_id, task_ref)
            .await?
            .ok_or_else(|| MutationError::TaskNotFound {
                project_id: project_id.to_string(),
                task_ref: task_ref.to_string(),
            })?;
        Ok((project, task))
    }

    async fn plan(
        &self,
        project: &Project,
        current: &Task,
        actor: &Actor,
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> Plan {
        let mut draft = Draft::new(current);

        if let Patch::Set(name) = normalize_text(&patch.task_name) {
            draft.set("taskName", json!(name));
        }
        draft.apply("description", normalize_text(&patch.description));
        draft.apply("initiatorName", normalize_text(&patch.initiator_name));
        draft.apply("initiatorEmail", normalize_text(&patch.initiator_email));
        let bs_address = normalize_text(&patch.bs_address);
        draft.apply("bsAddress", bs_address.clone());

        match &patch.priority {
            Patch::Keep => {}
            Patch::Clear => {
                draft.unset("priority");
            }
            Patch::Set(raw) => match normalize_priority(raw) {
                Some(priority) => {
                    draft.set("priority", document(&priority));
                }
                None => debug!(
                    task_id = %current.id,
                    value = %raw,
                    "Dropping unrecognised priority"
                ),
            },
        }
        draft.apply("dueDate", normalize_date(&patch.due_date));
        draft.apply("totalCost", normalize_number(&patch.total_cost));
        draft.apply("contractorPayment", normalize_number(&patch.contractor_payment));

        match &patch.work_items {
            Patch::Keep => {}
            Patch::Clear => {
                draft.set("workItems", json!([]));
            }
            Patch::Set(raw) => match normalize_work_items(raw) {
                Some(items) => {
                    draft.set("workItems", document(&items));
                }
                None => debug!(task_id = %current.id, "Dropping work items that are not a list"),
            },
        }

        let related = match &patch.related_tasks {
            Patch::Keep => None,
            Patch::Clear => Some(Vec::new()),
            Patch::Set(ids) => Some(normalize_related(ids, &current.id)),
        };
        let mut relations = RelationDelta::default();
        if let Some(next) = related {
            if draft.set("relatedTasks", document(&next)) {
                relations = RelationDelta::between(&current.related_tasks, &next);
            }
        }

        let requested =
            ExecutorChange::classify(current.executor_id.as_deref(), &patch.executor_id);
        let (executor, executor_name) = apply_executor(&mut draft, current, patch, requested);

        let explicit = match &patch.status {
            Patch::Set(s) => normalize_status(s),
            _ => None,
        };
        let transition = derive_transition(&current.status, explicit.as_ref(), executor);
        if let Some(status) = &transition.status {
            draft.set("status", document(status));
        }

        let site_sync = self
            .reconcile_sites(&mut draft, project, current, patch, &bs_address)
            .await;

        let mut events = Vec::new();
        if !draft.changes.is_empty() {
            events.push(TaskEvent {
                action: EventAction::Updated,
                author: actor.display_name(),
                author_id: actor.id.clone(),
                date: now,
                details: Some(draft.changes.to_details()),
            });
        }
        if transition.auto_assigned {
            events.push(TaskEvent {
                action: EventAction::StatusChangedAssigned,
                author: actor.display_name(),
                author_id: actor.id.clone(),
                date: now,
                details: Some(json!({
                    "taskName": draft.value("taskName"),
                    "bsNumber": draft.value("bsNumber"),
                    "executorName": executor_name,
                })),
            });
        }
        let Draft { mut update, changes, .. } = draft;
        update.push_events = events;

        Plan {
            update,
            changes,
            transition,
            executor,
            site_sync,
            relations,
        }
    }

    /// Resolve the site list and map point for this request. Returns the
    /// registry work to run after commit, if the sites need re-syncing.
    async fn reconcile_sites(
        &self,
        draft: &mut Draft,
        project: &Project,
        current: &Task,
        patch: &TaskPatch,
        bs_address: &Patch<String>,
    ) -> Option<SiteSync> {
        let base_address = match bs_address {
            Patch::Set(address) => Some(address.clone()),
            Patch::Clear => None,
            Patch::Keep => current.bs_address.clone(),
        };
        let supplied_locations = match &patch.bs_location {
            Patch::Set(raw) => normalize_locations(raw, base_address.as_deref()),
            _ => None,
        };
        let latitude = normalize_number(&patch.bs_latitude);
        let longitude = normalize_number(&patch.bs_longitude);

        let number_patch = normalize_text(&patch.bs_number);
        let next_number = match &number_patch {
            Patch::Keep => current.bs_number.clone(),
            Patch::Clear => None,
            Patch::Set(n) => Some(n.clone()),
        };
        let number_changed = draft.apply("bsNumber", number_patch);

        let input = SiteInput {
            bs_number: next_number.clone(),
            supplied_locations,
            latitude: latitude.as_set().copied(),
            longitude: longitude.as_set().copied(),
            base_address,
        };
        let scope = RegistryScope::for_project(project);

        let resolved = if number_changed {
            let found = match &next_number {
                Some(number) => match self
                    .registry
                    .find_station(&scope, &normalize_site_number(number))
                    .await
                {
                    Ok(station) => station,
                    Err(e) => {
                        warn!(
                            task_id = %current.id,
                            bs_number = %number,
                            error = %e,
                            "Registry lookup failed, treating site as unknown"
                        );
                        None
                    }
                },
                None => None,
            };
            Some(resolve_after_number_change(found.as_ref(), &input))
        } else {
            input.supplied_locations.clone()
        };

        let sites_changed = match &resolved {
            Some(sites) => draft.set("bsLocation", document(sites)),
            None => false,
        };
        let reconcile = number_changed || sites_changed;

        let point = match (&resolved, reconcile) {
            (Some(sites), true) => map_point(sites, &input),
            _ => None,
        };
        match point {
            Some((lat, lon)) => {
                draft.set("bsLatitude", json!(lat));
                draft.set("bsLongitude", json!(lon));
            }
            None => {
                draft.apply("bsLatitude", latitude);
                draft.apply("bsLongitude", longitude);
            }
        }

        let sites = resolved.filter(|_| reconcile)?;
        if sites.is_empty() {
            return None;
        }
        Some(SiteSync::new(&current.id, &current.code, &sites, scope, &input))
    }
}

/// Write the executor trio.
///
/// Returns the effective executor change and the display name of a newly
/// attached executor. A supplied id the change detector considers equal to the
/// stored one is not a reassignment.
fn apply_executor(
    draft: &mut Draft,
    current: &Task,
    patch: &TaskPatch,
    change: ExecutorChange,
) -> (ExecutorChange, Option<String>) {
    let text = |p: &Patch<String>| match normalize_text(p) {
        Patch::Set(s) => Some(s),
        _ => None,
    };
    match change {
        ExecutorChange::Gained | ExecutorChange::Replaced => {
            let Some(id) = patch.executor_id.as_set().map(|id| id.trim().to_string()) else {
                return (ExecutorChange::Unchanged, None);
            };
            if !draft.set("executorId", json!(id)) {
                return apply_executor(draft, current, patch, ExecutorChange::Unchanged);
            }
            let email = text(&patch.executor_email);
            let name = text(&patch.executor_name)
                .or_else(|| email.clone())
                .unwrap_or_else(|| id.clone());
            draft.set("executorName", json!(name));
            match email {
                Some(email) => draft.set("executorEmail", json!(email)),
                None => draft.unset("executorEmail"),
            };
            (change, Some(name))
        }
        ExecutorChange::Removed => {
            draft.unset("executorId");
            draft.unset("executorName");
            draft.unset("executorEmail");
            (change, None)
        }
        ExecutorChange::Unchanged => {
            if current.has_executor() {
                draft.apply("executorName", normalize_text(&patch.executor_name));
                draft.apply("executorEmail", normalize_text(&patch.executor_email));
            }
            (change, None)
        }
    }
}

fn document<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Output of the planning phase: what to commit and what to do afterwards.
struct Plan {
    update: TaskUpdate,
    changes: ChangeSet,
    transition: Transition,
    executor: ExecutorChange,
    site_sync: Option<SiteSync>,
    relations: RelationDelta,
}

/// Builds the update and the diff set in lockstep: a field only enters the
/// update when the change detector records a change for it.
struct Draft {
    stored: Map<String, Value>,
    update: TaskUpdate,
    changes: ChangeSet,
}

impl Draft {
    fn new(task: &Task) -> Self {
        let stored = match serde_json::to_value(task) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Draft {
            stored,
            update: TaskUpdate::default(),
            changes: ChangeSet::new(),
        }
    }

    fn stored(&self, field: &str) -> Value {
        self.stored.get(field).cloned().unwrap_or(Value::Null)
    }

    /// The value `field` will have after the update.
    fn value(&self, field: &str) -> Value {
        if let Some(v) = self.update.set.get(field) {
            return v.clone();
        }
        if self.update.unset.iter().any(|f| f == field) {
            return Value::Null;
        }
        self.stored(field)
    }

    fn set(&mut self, field: &str, value: Value) -> bool {
        let changed = self.changes.mark_change(field, self.stored(field), value.clone());
        if changed {
            self.update.set(field, value);
        }
        changed
    }

    fn unset(&mut self, field: &str) -> bool {
        let changed = self.changes.mark_change(field, self.stored(field), Value::Null);
        if changed {
            self.update.unset(field);
        }
        changed
    }

    fn apply<T: Serialize>(&mut self, field: &str, patch: Patch<T>) -> bool {
        match patch {
            Patch::Keep => false,
            Patch::Clear => self.unset(field),
            Patch::Set(v) => self.set(field, document(&v)),
        }
    }
}
