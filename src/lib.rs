//! # fieldtask - field work order task engine
//!
//! Applies partial updates to telecom field work orders (tasks tied to base
//! station sites) and propagates their side effects.
//!
//! ## What a patch does
//!
//! - **Normalizes** loosely typed input: status aliases, numeric strings,
//!   several date formats, site lists and addresses
//! - **Diffs** against the stored task with value-aware equality, so a
//!   request that changes nothing writes nothing
//! - **Drives the status workflow**: attaching an executor to a `To do` task
//!   moves it to `Assigned`, detaching one from an `Assigned` task moves it back
//! - **Commits** changed fields and event log entries in one atomic update
//! - **Fans out** afterwards: geo-registry upserts, reverse `relatedTasks`
//!   edges and notifications, where a failing side effect never fails the patch
//!
//! ## Quick Start
//!
//! ```bash
//! # Assign an executor
//! ft patch T-100 --org org1 --project north --actor-id mgr-1 \
//!     --json '{"executorId": "u1", "executorName": "Ivan Petrov"}'
//!
//! # Move a task to a new site; coordinates come from the registry when known
//! echo '{"bsNumber": "1234", "bsLatitude": 55.75, "bsLongitude": 37.61}' \
//!     | ft patch T-100 --org org1 --project north --actor-id mgr-1
//!
//! # Inspect
//! ft show T-100 --org org1 --project north
//! ft history T-100 --org org1 --project north
//! ```
//!
//! Data is stored in `~/.fieldtask/tasks.json` unless `--db`, `fieldtask.toml`
//! or `FIELDTASK__STORE__PATH` say otherwise.

pub mod cli;
pub mod cmd;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod fanout;
pub mod fields;
pub mod location;
pub mod mutation;
pub mod normalize;
pub mod notify;
pub mod patch;
pub mod relations;
pub mod state;
pub mod store;
pub mod task;
pub mod telemetry;

pub use error::MutationError;
pub use mutation::{MutationOptions, MutationOutcome, TaskMutator};
pub use patch::{Patch, TaskPatch};
pub use task::{Actor, Task};
