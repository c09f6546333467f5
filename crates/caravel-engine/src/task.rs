//! Tasks and their state machine
//!
//! A task is one unit of cluster work owned by a component: an HTTP
//! operation plus whatever waiting confirms it. States move strictly
//! forward; everything from `Done` on is terminal. The ordering of the
//! variants is load-bearing: "failed" means any state greater than `Done`.

use caravel_kube::Event;
use tracing::trace;

use crate::component::ComponentId;

/// Handle to a task in its [`TaskSet`](crate::graph::TaskSet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) usize);

/// Task lifecycle; declaration order defines progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    /// Not yet evaluated
    Pre,
    /// Waiting for dependencies
    Blocked,
    /// Dependencies satisfied; ready to dispatch
    Ready,
    /// Request in flight
    Executing,
    /// Request accepted; waiting for events or probes to confirm
    Waiting,
    /// Finished successfully
    Done,
    /// Cancelled before completion
    Aborted,
    /// The operation failed
    Failed,
    /// A task this one depends on failed
    DependencyFailed,
}

impl TaskState {
    pub fn is_done(&self) -> bool {
        *self == TaskState::Done
    }

    /// Any failure state sorts after `Done`
    pub fn is_failed(&self) -> bool {
        *self > TaskState::Done
    }

    pub fn is_terminal(&self) -> bool {
        *self >= TaskState::Done
    }
}

/// What the task does when dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Create,
    Delete,
}

/// Correlates inbound cluster events to a waiting task.
///
/// A workload's pods carry the workload's name as a prefix; counting
/// matching `Created` events up to the declared replica count closes the
/// loop without polling.
#[derive(Debug, Clone)]
pub struct EventRule {
    /// Kind of the involved object, e.g. "Pod"
    pub object_kind: String,
    /// Namespace the event must come from
    pub namespace: String,
    /// Involved object name must start with this
    pub name_prefix: String,
    /// Event reason to count, e.g. "Created"
    pub reason: String,
    /// Matches needed to complete the task
    pub target: i32,
    /// Matches seen so far
    pub seen: i32,
}

impl EventRule {
    pub fn matches(&self, event: &Event) -> bool {
        let object = &event.involved_object;
        if object.kind.as_deref() != Some(self.object_kind.as_str()) {
            return false;
        }
        if !object
            .name
            .as_deref()
            .is_some_and(|n| n.starts_with(&self.name_prefix))
        {
            return false;
        }
        let event_ns = object
            .namespace
            .as_deref()
            .or(event.metadata.namespace.as_deref());
        if event_ns != Some(self.namespace.as_str()) {
            return false;
        }
        event.reason.as_deref() == Some(self.reason.as_str())
    }
}

/// An executable unit attached to exactly one component
#[derive(Debug)]
pub struct Task {
    pub name: String,
    pub component: ComponentId,
    pub action: TaskAction,
    pub state: TaskState,
    pub depends_on: Vec<TaskId>,
    /// Event correlation for workload creates
    pub watch: Option<EventRule>,
    /// Whether a readiness probe can confirm this task
    pub probe: bool,
}

impl Task {
    pub fn new(name: String, component: ComponentId, action: TaskAction) -> Self {
        Self {
            name,
            component,
            action,
            state: TaskState::Pre,
            depends_on: Vec::new(),
            watch: None,
            probe: false,
        }
    }

    /// Transition forward. Terminal states never move again; the request
    /// is ignored and `false` returned.
    pub fn set_state(&mut self, next: TaskState) -> bool {
        if self.state == next {
            return false;
        }
        if self.state.is_terminal() {
            trace!(task = %self.name, from = ?self.state, to = ?next, "ignoring transition out of terminal state");
            return false;
        }
        trace!(task = %self.name, from = ?self.state, to = ?next, "task state");
        self.state = next;
        true
    }

    pub fn add_dependency(&mut self, dep: TaskId) {
        if !self.depends_on.contains(&dep) {
            self.depends_on.push(dep);
        }
    }

    /// Advance `Pre -> Blocked -> Ready` deterministically.
    ///
    /// `component_blocked` is whether the owning component still waits on a
    /// `dependsOn` component; `dep_states` are the states of this task's
    /// dependencies. Returns whether anything changed.
    pub fn evaluate(&mut self, component_blocked: bool, dep_states: &[TaskState]) -> bool {
        let mut changed = false;

        if self.state == TaskState::Pre {
            self.state = TaskState::Blocked;
            changed = true;
        }

        if self.state == TaskState::Blocked {
            if component_blocked {
                return changed;
            }

            let mut blocked = false;
            for dep in dep_states {
                if *dep >= TaskState::Aborted {
                    self.state = TaskState::DependencyFailed;
                    return true;
                }
                if !dep.is_done() {
                    blocked = true;
                }
            }

            if !blocked {
                self.state = TaskState::Ready;
                changed = true;
            }
        }

        changed
    }

    /// Whether the task is interested in cluster events right now
    pub fn is_monitoring(&self) -> bool {
        matches!(self.state, TaskState::Executing | TaskState::Waiting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod_event(name: &str, namespace: &str, reason: &str) -> Event {
        Event {
            metadata: ObjectMeta {
                name: Some(format!("{name}.17f")),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_evaluate_pre_to_blocked() {
        let mut task = Task::new("t".into(), ComponentId(0), TaskAction::Create);
        assert!(task.evaluate(true, &[]));
        assert_eq!(task.state, TaskState::Blocked);
    }

    #[test]
    fn test_evaluate_unblocks_when_deps_done() {
        let mut task = Task::new("t".into(), ComponentId(0), TaskAction::Create);
        task.evaluate(false, &[TaskState::Blocked]);
        assert_eq!(task.state, TaskState::Blocked);

        task.evaluate(false, &[TaskState::Done]);
        assert_eq!(task.state, TaskState::Ready);
    }

    #[test]
    fn test_evaluate_stays_blocked_on_component_dependency() {
        let mut task = Task::new("t".into(), ComponentId(0), TaskAction::Create);
        task.evaluate(true, &[]);
        task.evaluate(true, &[]);
        assert_eq!(task.state, TaskState::Blocked);
    }

    #[test]
    fn test_evaluate_dependency_failure() {
        let mut task = Task::new("t".into(), ComponentId(0), TaskAction::Create);
        task.evaluate(false, &[TaskState::Failed]);
        assert_eq!(task.state, TaskState::DependencyFailed);
    }

    #[test]
    fn test_terminal_states_never_move() {
        let mut task = Task::new("t".into(), ComponentId(0), TaskAction::Create);
        task.state = TaskState::Done;
        assert!(!task.set_state(TaskState::Failed));
        assert_eq!(task.state, TaskState::Done);

        task.state = TaskState::Failed;
        assert!(!task.set_state(TaskState::Done));
        assert_eq!(task.state, TaskState::Failed);

        // Terminal tasks are inert under evaluate() too.
        assert!(!task.evaluate(false, &[TaskState::Done]));
        assert_eq!(task.state, TaskState::Failed);
    }

    #[test]
    fn test_state_ordering() {
        assert!(TaskState::Pre < TaskState::Blocked);
        assert!(TaskState::Waiting < TaskState::Done);
        assert!(TaskState::Aborted.is_failed());
        assert!(TaskState::DependencyFailed.is_failed());
        assert!(!TaskState::Done.is_failed());
        assert!(TaskState::Done.is_terminal());
    }

    #[test]
    fn test_event_rule_matching() {
        let rule = EventRule {
            object_kind: "Pod".to_string(),
            namespace: "default".to_string(),
            name_prefix: "web-".to_string(),
            reason: "Created".to_string(),
            target: 2,
            seen: 0,
        };

        assert!(rule.matches(&pod_event("web-6b7f9-x2x", "default", "Created")));
        assert!(!rule.matches(&pod_event("web-6b7f9-x2x", "default", "Killing")));
        assert!(!rule.matches(&pod_event("web-6b7f9-x2x", "other", "Created")));
        assert!(!rule.matches(&pod_event("api-6b7f9-x2x", "default", "Created")));

        let mut not_a_pod = pod_event("web-1", "default", "Created");
        not_a_pod.involved_object.kind = Some("ReplicaSet".to_string());
        assert!(!rule.matches(&not_a_pod));
    }
}
