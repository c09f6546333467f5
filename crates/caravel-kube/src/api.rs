//! The narrow contract the engine uses to talk to a cluster
//!
//! The engine never builds URLs or touches HTTP itself; everything it needs
//! from a cluster fits in three calls. Implementations: [`KubeApi`] over a
//! real cluster, [`MockApi`] for tests.
//!
//! [`KubeApi`]: crate::client::KubeApi
//! [`MockApi`]: crate::mock::MockApi

use async_trait::async_trait;
use caravel_core::Kind;
use serde_json::Value;

use crate::error::Result;

/// Outcome of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The cluster accepted the delete
    Deleted,
    /// The object was already absent (HTTP 404); counts as success
    Gone,
}

/// Coarse lifecycle state of an object, as seen by a readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// No such object
    Missing,
    /// Present but not yet ready
    Init,
    /// Present and serving (workloads: all replicas ready)
    Ready,
    /// Ran to completion (jobs) or simply exists (passive kinds)
    Done,
    /// The object reports a terminal failure
    Failed,
}

/// Cluster API dispatcher used by the scheduler.
///
/// One instance per cluster; shared by every task of that cluster. All
/// methods are object-safe so the scheduler can hold `Arc<dyn ResourceApi>`.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// POST a manifest to its kind's collection.
    ///
    /// `body` is the full wire object including `apiVersion` and `kind`.
    async fn create(&self, kind: Kind, namespace: &str, body: Value) -> Result<()>;

    /// DELETE an object. A 404 response maps to [`DeleteOutcome::Gone`].
    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<DeleteOutcome>;

    /// GET an object and classify its readiness
    async fn probe(&self, kind: Kind, namespace: &str, name: &str) -> Result<ObjectState>;
}
