//! Caravel kube - the cluster-facing edge
//!
//! This crate provides:
//! - **ResourceApi**: the narrow contract the scheduler drives clusters with
//! - **KubeApi**: the real implementation over a `kube` client
//! - **MockApi**: an in-memory implementation for tests
//! - **EventWatcher**: the long-lived events watch with reconnect backoff
//! - **probe**: readiness classification for probed objects

pub mod api;
pub mod client;
pub mod error;
pub mod mock;
pub mod probe;
pub mod watch;

pub use api::{DeleteOutcome, ObjectState, ResourceApi};
pub use client::{ClusterClient, KubeApi};
pub use error::{KubeError, Result};
pub use mock::{ApiCall, MockApi, OperationCounts};
pub use probe::classify;
pub use watch::{Backoff, EventWatcher};

/// The cluster event type the scheduler correlates
pub use k8s_openapi::api::core::v1::Event;

/// Re-exported so callers can name kinds without a direct core dependency
pub use caravel_core::Kind;
