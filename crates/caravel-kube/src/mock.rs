//! In-memory cluster API for testing
//!
//! Stores objects in memory and records every call, so scheduler behavior
//! can be asserted without a cluster: which collections were posted to, in
//! what order, and what each probe answered. Probe answers can be scripted
//! per object; create/delete failures can be injected.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use caravel_core::Kind;
use serde_json::Value;

use crate::api::{DeleteOutcome, ObjectState, ResourceApi};
use crate::error::{KubeError, Result};

/// One recorded API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Create {
        kind: Kind,
        namespace: String,
        name: String,
    },
    Delete {
        kind: Kind,
        namespace: String,
        name: String,
    },
    Probe {
        kind: Kind,
        namespace: String,
        name: String,
    },
}

/// Counts of operations performed, for quick assertions
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OperationCounts {
    pub creates: usize,
    pub deletes: usize,
    pub probes: usize,
}

type ObjKey = (Kind, String, String);

#[derive(Default)]
struct MockState {
    log: Vec<ApiCall>,
    counts: OperationCounts,
    /// Objects currently "in the cluster" and their steady probe answer
    objects: BTreeMap<ObjKey, ObjectState>,
    /// Scripted probe answers consumed before the steady answer
    probe_script: BTreeMap<ObjKey, VecDeque<ObjectState>>,
    /// Names whose create call fails
    fail_create: BTreeSet<(Kind, String)>,
    /// Names whose delete call fails
    fail_delete: BTreeSet<(Kind, String)>,
    /// Steady probe answer installed when an object is created, overriding
    /// the kind-based default
    steady_on_create: BTreeMap<(Kind, String), ObjectState>,
}

/// In-memory [`ResourceApi`] implementation
#[derive(Clone, Default)]
pub struct MockApi {
    state: Arc<Mutex<MockState>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an object, as if it already existed in the cluster
    pub fn put_object(&self, kind: Kind, namespace: &str, name: &str, state: ObjectState) {
        let mut s = self.state.lock().unwrap();
        s.objects
            .insert((kind, namespace.to_string(), name.to_string()), state);
    }

    /// Queue probe answers returned (in order) before the steady state
    pub fn script_probes(&self, kind: Kind, namespace: &str, name: &str, states: &[ObjectState]) {
        let mut s = self.state.lock().unwrap();
        s.probe_script
            .entry((kind, namespace.to_string(), name.to_string()))
            .or_default()
            .extend(states.iter().copied());
    }

    /// Make create fail for this object
    pub fn fail_create(&self, kind: Kind, name: &str) {
        let mut s = self.state.lock().unwrap();
        s.fail_create.insert((kind, name.to_string()));
    }

    /// Make delete fail for this object
    pub fn fail_delete(&self, kind: Kind, name: &str) {
        let mut s = self.state.lock().unwrap();
        s.fail_delete.insert((kind, name.to_string()));
    }

    /// Choose the steady probe answer an object gets once created (e.g.
    /// keep a workload at `Init` so only events can finish its task)
    pub fn steady_on_create(&self, kind: Kind, name: &str, state: ObjectState) {
        let mut s = self.state.lock().unwrap();
        s.steady_on_create.insert((kind, name.to_string()), state);
    }

    /// All calls in arrival order
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().unwrap().log.clone()
    }

    /// Create/delete calls only, in arrival order (probes are chatty)
    pub fn mutations(&self) -> Vec<ApiCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, ApiCall::Probe { .. }))
            .collect()
    }

    pub fn counts(&self) -> OperationCounts {
        self.state.lock().unwrap().counts
    }

    /// Whether the object currently exists in the mock cluster
    pub fn has_object(&self, kind: Kind, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .contains_key(&(kind, namespace.to_string(), name.to_string()))
    }
}

#[async_trait]
impl ResourceApi for MockApi {
    async fn create(&self, kind: Kind, namespace: &str, body: Value) -> Result<()> {
        let name = body["metadata"]["name"]
            .as_str()
            .unwrap_or("unnamed")
            .to_string();

        let mut s = self.state.lock().unwrap();
        s.counts.creates += 1;
        s.log.push(ApiCall::Create {
            kind,
            namespace: namespace.to_string(),
            name: name.clone(),
        });

        if s.fail_create.contains(&(kind, name.clone())) {
            return Err(KubeError::Request(format!(
                "injected create failure for {kind}/{name}"
            )));
        }

        // New objects answer Ready unless configured otherwise; passive
        // kinds are Done the moment they exist.
        let steady = s
            .steady_on_create
            .get(&(kind, name.clone()))
            .copied()
            .unwrap_or(if kind.is_workload() {
                ObjectState::Ready
            } else {
                ObjectState::Done
            });
        s.objects
            .insert((kind, namespace.to_string(), name), steady);
        Ok(())
    }

    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        let mut s = self.state.lock().unwrap();
        s.counts.deletes += 1;
        s.log.push(ApiCall::Delete {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        if s.fail_delete.contains(&(kind, name.to_string())) {
            return Err(KubeError::Request(format!(
                "injected delete failure for {kind}/{name}"
            )));
        }

        match s
            .objects
            .remove(&(kind, namespace.to_string(), name.to_string()))
        {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::Gone),
        }
    }

    async fn probe(&self, kind: Kind, namespace: &str, name: &str) -> Result<ObjectState> {
        let key = (kind, namespace.to_string(), name.to_string());
        let mut s = self.state.lock().unwrap();
        s.counts.probes += 1;
        s.log.push(ApiCall::Probe {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        if let Some(queue) = s.probe_script.get_mut(&key) {
            if let Some(state) = queue.pop_front() {
                return Ok(state);
            }
        }

        Ok(s.objects.get(&key).copied().unwrap_or(ObjectState::Missing))
    }
}
