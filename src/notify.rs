//! Deciding who hears about a committed task change.
//!
//! Three kinds of notice exist: assignment, unassignment and status change. The
//! decision is made from the task before and after the commit; delivery is
//! best-effort through the [`Notifier`] collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::fanout::FanOut;
use crate::fields::Status;
use crate::state::ExecutorChange;
use crate::task::{Actor, Recipient, Task};

/// Identifies the task and its context in every notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeContext {
    pub org_id: String,
    pub project_id: String,
    pub task_id: String,
    pub task_code: String,
    pub task_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bs_number: Option<String>,
    /// Who made the change.
    pub triggered_by: Actor,
}

impl NoticeContext {
    pub fn new(task: &Task, actor: &Actor) -> Self {
        NoticeContext {
            org_id: task.org_id.clone(),
            project_id: task.project_id.clone(),
            task_id: task.id.clone(),
            task_code: task.code.clone(),
            task_name: task.task_name.clone(),
            bs_number: task.bs_number.clone(),
            triggered_by: actor.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentNotice {
    pub recipient: Recipient,
    pub context: NoticeContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeNotice {
    pub recipients: Vec<Recipient>,
    pub from: Status,
    pub to: Status,
    pub context: NoticeContext,
}

/// A notice the dispatcher decided to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Assigned(AssignmentNotice),
    Unassigned(AssignmentNotice),
    StatusChanged(StatusChangeNotice),
}

impl Notification {
    /// Fan-out operation name.
    pub fn operation(&self) -> String {
        match self {
            Notification::Assigned(n) => format!("notify.assigned:{}", n.recipient.key()),
            Notification::Unassigned(n) => format!("notify.unassigned:{}", n.recipient.key()),
            Notification::StatusChanged(_) => "notify.status_changed".to_string(),
        }
    }
}

/// The notification delivery collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_assigned(&self, notice: &AssignmentNotice) -> Result<(), CollaboratorError>;
    async fn send_unassigned(&self, notice: &AssignmentNotice) -> Result<(), CollaboratorError>;
    async fn send_status_changed(
        &self,
        notice: &StatusChangeNotice,
    ) -> Result<(), CollaboratorError>;
}

/// Decide which notices a committed change produces.
///
/// - a new executor is told they were assigned
/// - a previous executor that lost the task is told they were unassigned
/// - any status difference between `before` and `after` produces a status
///   notice for the executor and the initiator, leaving out an executor who was
///   just assigned by this same request
pub fn plan_notifications(
    before: &Task,
    after: &Task,
    executor: ExecutorChange,
    actor: &Actor,
) -> Vec<Notification> {
    let context = NoticeContext::new(after, actor);
    let mut out = Vec::new();

    let just_assigned = if executor.assigns() { after.executor() } else { None };
    if let Some(recipient) = &just_assigned {
        out.push(Notification::Assigned(AssignmentNotice {
            recipient: recipient.clone(),
            context: context.clone(),
        }));
    }
    if executor.unassigns() {
        if let Some(recipient) = before.executor() {
            out.push(Notification::Unassigned(AssignmentNotice {
                recipient,
                context: context.clone(),
            }));
        }
    }

    if before.status != after.status {
        let mut recipients: Vec<Recipient> = Vec::new();
        for candidate in [after.executor(), after.initiator()].into_iter().flatten() {
            let skip = just_assigned.as_ref().is_some_and(|r| r.key() == candidate.key())
                || recipients.iter().any(|r| r.key() == candidate.key());
            if !skip {
                recipients.push(candidate);
            }
        }
        out.push(Notification::StatusChanged(StatusChangeNotice {
            recipients,
            from: before.status.clone(),
            to: after.status.clone(),
            context,
        }));
    }
    out
}

/// Queue each notice as its own fan-out operation.
pub fn queue_notifications(
    fan_out: &mut FanOut,
    notifier: &Arc<dyn Notifier>,
    notifications: Vec<Notification>,
) {
    for notification in notifications {
        let notifier = Arc::clone(notifier);
        let name = notification.operation();
        fan_out.push(name, async move {
            match &notification {
                Notification::Assigned(n) => notifier.send_assigned(n).await,
                Notification::Unassigned(n) => notifier.send_unassigned(n).await,
                Notification::StatusChanged(n) => notifier.send_status_changed(n).await,
            }
        });
    }
}
