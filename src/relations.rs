//! Keeping the related-task relation symmetric.
//!
//! Callers only ever edit the related-task list of one task. The reverse edges on
//! the other side are added and removed here after the edit is committed.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::fanout::FanOut;

/// Maintains reverse references on related tasks.
#[async_trait]
pub trait RelationGraph: Send + Sync {
    /// Make `target_id` reference `source_id`. Adding an existing edge is a no-op.
    async fn add_reverse_edge(&self, target_id: &str, source_id: &str)
        -> Result<(), CollaboratorError>;

    /// Drop the reference to `source_id` from `target_id`.
    async fn remove_reverse_edge(&self, target_id: &str, source_id: &str)
        -> Result<(), CollaboratorError>;
}

/// Reverse edges to add and remove after a related-task edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationDelta {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

impl RelationDelta {
    /// `to_add = next - previous`, `to_remove = previous - next`, each in input order.
    pub fn between(previous: &[String], next: &[String]) -> Self {
        let before: HashSet<&str> = previous.iter().map(String::as_str).collect();
        let after: HashSet<&str> = next.iter().map(String::as_str).collect();
        RelationDelta {
            to_add: next.iter().filter(|id| !before.contains(id.as_str())).cloned().collect(),
            to_remove: previous.iter().filter(|id| !after.contains(id.as_str())).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Queue one operation per reverse edge so each target fails independently.
    pub fn queue(self, fan_out: &mut FanOut, graph: &Arc<dyn RelationGraph>, source_id: &str) {
        for target in self.to_add {
            let graph = Arc::clone(graph);
            let source = source_id.to_string();
            fan_out.push(format!("relations.add:{target}"), async move {
                graph.add_reverse_edge(&target, &source).await
            });
        }
        for target in self.to_remove {
            let graph = Arc::clone(graph);
            let source = source_id.to_string();
            fan_out.push(format!("relations.remove:{target}"), async move {
                graph.remove_reverse_edge(&target, &source).await
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_symmetric_difference() {
        let delta = RelationDelta::between(&ids(&["b"]), &ids(&["b", "c"]));
        assert_eq!(delta.to_add, ids(&["c"]));
        assert!(delta.to_remove.is_empty());

        let delta = RelationDelta::between(&ids(&["b", "c"]), &ids(&["d"]));
        assert_eq!(delta.to_add, ids(&["d"]));
        assert_eq!(delta.to_remove, ids(&["b", "c"]));

        assert!(RelationDelta::between(&ids(&["a"]), &ids(&["a"])).is_empty());
    }
}
