//! The per-cluster scheduler
//!
//! One scheduler owns one cluster's component tree and task set. It is an
//! explicit message-pumped reactor: every stimulus (an inbound cluster
//! event, a probe timer firing, a finished HTTP call) arrives as a
//! [`Pulse`] on a single channel, and all state lives inside the reactor
//! task. Spawned I/O futures only ever send pulses back, so `run_tasks`
//! can never re-enter and no locking is needed anywhere.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use caravel_core::Config;
use caravel_kube::{DeleteOutcome, Event, ObjectState, ResourceApi};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::component::{ComponentId, ComponentState, ComponentTree, Mode};
use crate::error::{EngineError, Result};
use crate::graph::TaskSet;
use crate::task::{TaskAction, TaskId, TaskState};

/// A stimulus for the reactor
#[derive(Debug)]
pub enum Pulse {
    /// Re-run the task loop with no other change
    RunTasks,
    /// An event arrived from the cluster watch
    Event(Box<Event>),
    /// A task's probe timer fired
    Poll(TaskId),
    /// A spawned API call finished
    Dispatched { task: TaskId, outcome: DispatchOutcome },
}

/// What a spawned API call came back with
#[derive(Debug)]
pub enum DispatchOutcome {
    Created,
    Deleted,
    Gone,
    Probed(ObjectState),
    Failed(String),
}

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub cluster: String,
    /// Seconds from the first dispatched task to root completion
    pub elapsed: Option<f64>,
    pub components: usize,
    pub tasks: usize,
}

pub struct Scheduler {
    cluster: String,
    tree: ComponentTree,
    tasks: TaskSet,
    api: Arc<dyn ResourceApi>,
    tx: mpsc::Sender<Pulse>,
    rx: mpsc::Receiver<Pulse>,
    /// (namespace, involved kind) -> tasks that may care
    router: BTreeMap<(String, String), Vec<TaskId>>,
    poll_interval: Duration,
    deadline: Option<Duration>,
    ignore_errors: bool,
}

impl Scheduler {
    pub fn new(
        cluster: impl Into<String>,
        tree: ComponentTree,
        tasks: TaskSet,
        api: Arc<dyn ResourceApi>,
        config: &Config,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);

        // Event dispatch is a bucket lookup instead of a broadcast to every
        // task; built once, the rules never change after this point.
        let mut router: BTreeMap<(String, String), Vec<TaskId>> = BTreeMap::new();
        for tid in tasks.ids() {
            if let Some(rule) = &tasks.task(tid).watch {
                router
                    .entry((rule.namespace.clone(), rule.object_kind.clone()))
                    .or_default()
                    .push(tid);
            }
        }

        Self {
            cluster: cluster.into(),
            tree,
            tasks,
            api,
            tx,
            rx,
            router,
            poll_interval: Duration::from_secs(2),
            deadline: config.timeout.map(Duration::from_secs),
            ignore_errors: config.ignore_errors,
        }
    }

    /// Override the probe interval (tests shrink it)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Handle for feeding pulses from outside (the event watch)
    pub fn pulse_sender(&self) -> mpsc::Sender<Pulse> {
        self.tx.clone()
    }

    /// Drive everything to completion.
    ///
    /// Resolves when the root component reaches `Done` (report) or `Failed`
    /// (error listing the failed components).
    pub async fn run(mut self) -> Result<RunReport> {
        info!(
            cluster = %self.cluster,
            components = self.tree.len(),
            tasks = self.tasks.len(),
            "starting run"
        );

        let deadline = self.deadline.map(|d| tokio::time::Instant::now() + d);
        self.run_tasks();

        loop {
            if let Some(outcome) = self.completion() {
                return outcome;
            }

            let pulse = match deadline {
                Some(at) => match tokio::time::timeout_at(at, self.rx.recv()).await {
                    Ok(p) => p,
                    Err(_) => {
                        warn!(cluster = %self.cluster, "run deadline passed; aborting unfinished tasks");
                        self.abort_unfinished();
                        self.run_tasks();
                        continue;
                    }
                },
                None => self.rx.recv().await,
            };

            let Some(pulse) = pulse else {
                return Err(EngineError::ChannelClosed);
            };

            match pulse {
                Pulse::RunTasks => {}
                Pulse::Event(event) => self.on_event(&event),
                Pulse::Poll(task) => self.dispatch_probe(task),
                Pulse::Dispatched { task, outcome } => self.on_dispatched(task, outcome),
            }

            self.run_tasks();
        }
    }

    /// Iterate the tasks until a full pass changes nothing
    fn run_tasks(&mut self) {
        loop {
            let mut again = false;
            for tid in self.tasks.ids() {
                again |= self.evaluate_task(tid);
                if self.tasks.task(tid).state == TaskState::Ready {
                    self.execute(tid);
                    again = true;
                }
            }
            self.evaluate_components();
            if !again {
                return;
            }
        }
    }

    fn evaluate_task(&mut self, tid: TaskId) -> bool {
        let component = self.tasks.task(tid).component;
        let component_blocked = self.tree.is_blocked_on_dependency(component);
        let dep_states = self.tasks.dependency_states(tid);
        self.tasks.task_mut(tid).evaluate(component_blocked, &dep_states)
    }

    /// Dispatch a ready task's API call
    fn execute(&mut self, tid: TaskId) {
        let (component, action) = {
            let task = self.tasks.task(tid);
            (task.component, task.action)
        };
        let kind = self.tree.node(component).kind;
        let namespace = self.tree.namespace_for(component);
        let name = {
            let node = self.tree.node(component);
            node.payload.name().unwrap_or(&node.name).to_string()
        };

        self.tasks.task_mut(tid).set_state(TaskState::Executing);
        self.tree.start_timer(component);

        let api = self.api.clone();
        let tx = self.tx.clone();

        match action {
            TaskAction::Create => {
                let body = match self.tree.node(component).payload.manifest() {
                    Ok(body) => body,
                    Err(e) => {
                        self.fail_task(tid, &e.to_string());
                        return;
                    }
                };
                debug!(cluster = %self.cluster, resource = %self.tree.log_name(component), "applying");
                tokio::spawn(async move {
                    let outcome = match api.create(kind, &namespace, body).await {
                        Ok(()) => DispatchOutcome::Created,
                        Err(e) => DispatchOutcome::Failed(e.to_string()),
                    };
                    let _ = tx.send(Pulse::Dispatched { task: tid, outcome }).await;
                });
            }
            TaskAction::Delete => {
                debug!(cluster = %self.cluster, resource = %self.tree.log_name(component), "deleting");
                tokio::spawn(async move {
                    let outcome = match api.delete(kind, &namespace, &name).await {
                        Ok(DeleteOutcome::Deleted) => DispatchOutcome::Deleted,
                        Ok(DeleteOutcome::Gone) => DispatchOutcome::Gone,
                        Err(e) => DispatchOutcome::Failed(e.to_string()),
                    };
                    let _ = tx.send(Pulse::Dispatched { task: tid, outcome }).await;
                });
            }
        }
    }

    fn on_dispatched(&mut self, tid: TaskId, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Created => {
                let task = self.tasks.task(tid);
                if task.watch.is_some() || task.probe {
                    // Completion comes from events or probes.
                    self.tasks.task_mut(tid).set_state(TaskState::Waiting);
                    self.schedule_poll(tid);
                } else {
                    // Nothing will confirm a passive resource; the 2xx is it.
                    self.tasks.task_mut(tid).set_state(TaskState::Done);
                }
            }
            DispatchOutcome::Deleted => {
                if self.tasks.task(tid).probe {
                    // Wait until the object is actually gone.
                    self.tasks.task_mut(tid).set_state(TaskState::Waiting);
                    self.schedule_poll(tid);
                } else {
                    self.tasks.task_mut(tid).set_state(TaskState::Done);
                }
            }
            DispatchOutcome::Gone => {
                // Deleting something absent is success.
                self.tasks.task_mut(tid).set_state(TaskState::Done);
            }
            DispatchOutcome::Probed(state) => self.on_probe_result(tid, state),
            DispatchOutcome::Failed(message) => self.fail_task(tid, &message),
        }
    }

    fn fail_task(&mut self, tid: TaskId, message: &str) {
        let component = self.tasks.task(tid).component;
        warn!(
            cluster = %self.cluster,
            task = %self.tasks.task(tid).name,
            error = message,
            "request failed"
        );

        if self.ignore_errors {
            self.tasks.task_mut(tid).set_state(TaskState::Done);
            return;
        }

        self.tasks.task_mut(tid).set_state(TaskState::Failed);
        self.tree.set_state(component, ComponentState::Failed);
    }

    /// Fire a probe for a waiting task
    fn dispatch_probe(&mut self, tid: TaskId) {
        if self.tasks.task(tid).state != TaskState::Waiting {
            return;
        }
        let component = self.tasks.task(tid).component;
        let kind = self.tree.node(component).kind;
        let namespace = self.tree.namespace_for(component);
        let name = {
            let node = self.tree.node(component);
            node.payload.name().unwrap_or(&node.name).to_string()
        };

        let api = self.api.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = match api.probe(kind, &namespace, &name).await {
                Ok(state) => DispatchOutcome::Probed(state),
                Err(e) => DispatchOutcome::Failed(e.to_string()),
            };
            let _ = tx.send(Pulse::Dispatched { task: tid, outcome }).await;
        });
    }

    fn on_probe_result(&mut self, tid: TaskId, state: ObjectState) {
        if self.tasks.task(tid).state != TaskState::Waiting {
            return;
        }
        match self.tree.mode() {
            Mode::Create => match state {
                ObjectState::Ready | ObjectState::Done => {
                    self.tasks.task_mut(tid).set_state(TaskState::Done);
                }
                ObjectState::Failed => self.fail_task(tid, "probe reports failure"),
                ObjectState::Missing | ObjectState::Init => self.schedule_poll(tid),
            },
            Mode::Remove => match state {
                ObjectState::Missing | ObjectState::Done => {
                    self.tasks.task_mut(tid).set_state(TaskState::Done);
                }
                ObjectState::Failed => self.fail_task(tid, "probe reports failure"),
                ObjectState::Init | ObjectState::Ready => self.schedule_poll(tid),
            },
        }
    }

    fn schedule_poll(&self, tid: TaskId) {
        let tx = self.tx.clone();
        let delay = self.poll_interval;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Pulse::Poll(tid)).await;
        });
    }

    /// Feed one cluster event to the tasks that may be waiting for it
    fn on_event(&mut self, event: &Event) {
        let Some(kind) = event.involved_object.kind.as_deref() else {
            return;
        };
        let Some(namespace) = event
            .involved_object
            .namespace
            .as_deref()
            .or(event.metadata.namespace.as_deref())
        else {
            return;
        };

        let Some(candidates) = self
            .router
            .get(&(namespace.to_string(), kind.to_string()))
        else {
            return;
        };

        for tid in candidates.clone() {
            let task = self.tasks.task_mut(tid);
            if !task.is_monitoring() {
                continue;
            }
            let Some(rule) = task.watch.as_mut() else {
                continue;
            };
            if rule.matches(event) {
                rule.seen += 1;
                debug!(
                    task = %task.name,
                    seen = rule.seen,
                    target = rule.target,
                    "correlated event"
                );
                if rule.seen >= rule.target {
                    task.set_state(TaskState::Done);
                }
            }
        }
    }

    /// Derive component states from tasks and children until stable
    fn evaluate_components(&mut self) {
        loop {
            let mut changed = false;
            for id in self.tree.ids() {
                changed |= self.evaluate_component(id);
            }
            if !changed {
                return;
            }
        }
    }

    fn evaluate_component(&mut self, id: ComponentId) -> bool {
        let state = self.tree.node(id).state;
        let task_ids = self.tasks.tasks_of(id);

        let mut all_done = true;
        let mut saw_progress = false;
        for tid in &task_ids {
            let ts = self.tasks.task(*tid).state;
            if ts >= TaskState::Blocked {
                saw_progress = true;
            }
            if !ts.is_done() {
                all_done = false;
            }
            if ts.is_failed() {
                return self.tree.set_state(id, ComponentState::Failed);
            }
        }

        if all_done {
            let mut blocked_on_child = false;
            for child in self.tree.node(id).children.clone() {
                let cs = self.tree.node(child).state;
                if cs > ComponentState::Done {
                    debug!(
                        component = %self.tree.log_name(id),
                        child = %self.tree.log_name(child),
                        "failing because of child"
                    );
                    return self.tree.set_state(id, ComponentState::Failed);
                }
                if cs != ComponentState::Done {
                    blocked_on_child = true;
                }
            }

            if !blocked_on_child
                && !self.tree.is_blocked_on_dependency(id)
                && state != ComponentState::Done
            {
                return self.tree.set_state(id, ComponentState::Done);
            }
        }

        if !task_ids.is_empty() && saw_progress && state == ComponentState::Creating {
            return self.tree.set_state(id, ComponentState::Running);
        }

        false
    }

    /// Force every unfinished task into `Aborted` (deadline handling)
    fn abort_unfinished(&mut self) {
        for tid in self.tasks.ids() {
            if !self.tasks.task(tid).state.is_terminal() {
                self.tasks.task_mut(tid).set_state(TaskState::Aborted);
            }
        }
    }

    /// The run's result once the root is terminal
    fn completion(&self) -> Option<Result<RunReport>> {
        match self.tree.node(self.tree.root()).state {
            ComponentState::Done => Some(Ok(RunReport {
                cluster: self.cluster.clone(),
                elapsed: self.tree.node(self.tree.root()).elapsed,
                components: self.tree.len(),
                tasks: self.tasks.len(),
            })),
            ComponentState::Failed => {
                let failed = self
                    .tree
                    .ids()
                    .into_iter()
                    .filter(|id| self.tree.node(*id).state == ComponentState::Failed)
                    .map(|id| self.tree.log_name(id))
                    .collect();
                Some(Err(EngineError::RunFailed {
                    cluster: self.cluster.clone(),
                    failed,
                }))
            }
            _ => None,
        }
    }
}
