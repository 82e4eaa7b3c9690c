//! Isolated execution of post-commit side effects.
//!
//! Each side effect is a named operation. The runner drives all of them
//! concurrently, turns errors and panics into logged failures, and reports a
//! per-operation outcome. Nothing here can fail the mutation that queued it.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::CollaboratorError;

/// A queued side effect.
pub type Operation = BoxFuture<'static, Result<(), CollaboratorError>>;

/// Side effects queued for one committed task.
pub struct FanOut {
    task_id: String,
    task_code: String,
    operations: Vec<(String, Operation)>,
}

impl FanOut {
    pub fn new(task_id: impl Into<String>, task_code: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_code: task_code.into(),
            operations: Vec::new(),
        }
    }

    /// Queue `operation` under `name`. Nothing runs until [`FanOut::run`].
    pub fn push<F>(&mut self, name: impl Into<String>, operation: F)
    where
        F: Future<Output = Result<(), CollaboratorError>> + Send + 'static,
    {
        self.operations.push((name.into(), operation.boxed()));
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Run every queued operation concurrently and wait for all of them.
    pub async fn run(self) -> FanOutReport {
        let FanOut { task_id, task_code, operations } = self;
        let (names, futures): (Vec<String>, Vec<Operation>) = operations.into_iter().unzip();
        let results = join_all(
            futures
                .into_iter()
                .map(|op| AssertUnwindSafe(op).catch_unwind()),
        )
        .await;

        let outcomes = names
            .into_iter()
            .zip(results)
            .map(|(operation, result)| {
                let error = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some("operation panicked".to_string()),
                };
                match &error {
                    None => debug!(
                        task_id = %task_id,
                        operation = %operation,
                        "Fan-out operation completed"
                    ),
                    Some(e) => warn!(
                        task_id = %task_id,
                        task_code = %task_code,
                        operation = %operation,
                        error = %e,
                        "Fan-out operation failed"
                    ),
                }
                FanOutOutcome { operation, error }
            })
            .collect();

        FanOutReport { outcomes }
    }

    /// Run the operations on a background task without waiting for them.
    pub fn detach(self) -> JoinHandle<FanOutReport> {
        tokio::spawn(self.run())
    }
}

/// Result of a single fan-out operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutOutcome {
    pub operation: String,
    pub error: Option<String>,
}

/// Outcomes of every operation a fan-out ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub outcomes: Vec<FanOutOutcome>,
}

impl FanOutReport {
    pub fn failures(&self) -> impl Iterator<Item = &FanOutOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    pub fn failed(&self, operation: &str) -> bool {
        self.failures().any(|o| o.operation == operation)
    }

    pub fn ran(&self, operation: &str) -> bool {
        self.outcomes.iter().any(|o| o.operation == operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let mut fan_out = FanOut::new("t1", "T-1");
        fan_out.push("ok.first", async { Ok(()) });
        fan_out.push("broken", async {
            Err(CollaboratorError::Unavailable("registry down".into()))
        });
        fan_out.push("ok.second", async { Ok(()) });
        assert_eq!(fan_out.len(), 3);

        let report = fan_out.run().await;
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.failed("broken"));
        assert!(report.ran("ok.first") && !report.failed("ok.first"));
        assert!(report.ran("ok.second") && !report.failed("ok.second"));
        assert_eq!(report.failures().count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_operation_is_reported_not_propagated() {
        let mut fan_out = FanOut::new("t1", "T-1");
        fan_out.push("explodes", async {
            let items: Vec<u8> = Vec::new();
            if items.is_empty() {
                panic!("boom");
            }
            Ok(())
        });
        fan_out.push("fine", async { Ok(()) });
        let report = fan_out.run().await;
        assert!(report.failed("explodes"));
        assert!(!report.failed("fine"));
    }

    #[tokio::test]
    async fn test_detached_run_completes() {
        let mut fan_out = FanOut::new("t1", "T-1");
        fan_out.push("later", async { Ok(()) });
        let report = fan_out.detach().await.unwrap();
        assert!(report.ran("later"));
    }
}
