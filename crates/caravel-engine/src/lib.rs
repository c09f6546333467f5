//! Caravel engine - component trees, task graphs and the scheduler
//!
//! The engine turns a declarative bundle definition into a component tree,
//! derives the dependency and task graphs, and drives every task against a
//! cluster through the narrow API contract in `caravel-kube`:
//! - **component**: the arena-allocated tree and its state machine
//! - **payload**: kind-specific resource preparation and auto-injection
//! - **deps**: dependency scanning with cycle rejection
//! - **graph**: task construction and edge linking per mode
//! - **scheduler**: the per-cluster reactor loop
//! - **cluster** / **engine**: per-cluster driver and multi-cluster fan-out
//! - **dot**: dependency-graph dumps

pub mod cluster;
pub mod component;
pub mod deps;
pub mod dot;
pub mod engine;
pub mod error;
pub mod graph;
pub mod payload;
pub mod scheduler;
pub mod task;

pub use cluster::{Cluster, ClusterSpec};
pub use component::{Component, ComponentId, ComponentState, ComponentTree, Mode};
pub use deps::scan_dependencies;
pub use engine::{Engine, RunMode};
pub use error::{EngineError, Result};
pub use graph::{build_tasks, TaskSet};
pub use payload::{prepare_tree, Payload};
pub use scheduler::{DispatchOutcome, Pulse, RunReport, Scheduler};
pub use task::{EventRule, Task, TaskAction, TaskId, TaskState};
