//! Task graph construction
//!
//! Every non-grouping component contributes one task. Deploy mode links
//! edges from each component's parent relation; delete mode ignores the
//! declared relations entirely and orders structurally instead, each
//! parent's delete waiting for its children's. After linking, the builder
//! rejects any task that can reach itself.

use std::collections::BTreeSet;

use caravel_core::{Kind, ParentRelation};
use tracing::trace;

use crate::component::{ComponentId, ComponentTree, Mode};
use crate::error::{EngineError, Result};
use crate::task::{EventRule, Task, TaskAction, TaskId, TaskState};

/// The flat set of tasks for one cluster's run
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
}

impl TaskSet {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        (0..self.tasks.len()).map(TaskId).collect()
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    pub fn task_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id.0]
    }

    /// Tasks owned by a component
    pub fn tasks_of(&self, component: ComponentId) -> Vec<TaskId> {
        self.ids()
            .into_iter()
            .filter(|t| self.tasks[t.0].component == component)
            .collect()
    }

    /// Current states of a task's dependencies
    pub fn dependency_states(&self, id: TaskId) -> Vec<TaskState> {
        self.tasks[id.0]
            .depends_on
            .iter()
            .map(|d| self.tasks[d.0].state)
            .collect()
    }

    fn collect_closure(&self, id: TaskId, acc: &mut BTreeSet<TaskId>) {
        for dep in &self.tasks[id.0].depends_on {
            if acc.insert(*dep) {
                self.collect_closure(*dep, acc);
            }
        }
    }
}

/// Build and link the task set for the tree's mode
pub fn build_tasks(tree: &ComponentTree) -> Result<TaskSet> {
    let mut set = TaskSet::default();

    for id in tree.ids() {
        let node = tree.node(id);
        if node.kind.is_abstract() {
            continue;
        }

        let action = match tree.mode() {
            Mode::Create => TaskAction::Create,
            Mode::Remove => TaskAction::Delete,
        };
        let mut task = Task::new(node.name.clone(), id, action);

        if node.kind.is_workload() {
            task.probe = true;

            // Replica-counted kinds also close their loop on pod events.
            if tree.mode() == Mode::Create
                && matches!(node.kind, Kind::Deployment | Kind::StatefulSet | Kind::Job)
            {
                let resource_name = node.payload.name().unwrap_or(&node.name);
                task.watch = Some(EventRule {
                    object_kind: "Pod".to_string(),
                    namespace: tree.namespace_for(id),
                    name_prefix: format!("{resource_name}-"),
                    reason: "Created".to_string(),
                    target: node.payload.event_target(),
                    seen: 0,
                });
            }
        }

        set.tasks.push(task);
    }

    link_edges(&mut set, tree);
    validate_acyclic(&set)?;
    Ok(set)
}

fn link_edges(set: &mut TaskSet, tree: &ComponentTree) {
    for tid in set.ids() {
        let component = set.task(tid).component;
        // Namespace ordering is carried entirely by the scanner's
        // namespace-ownership edges. A parent-relation edge on top would
        // close a cycle through the component graph whenever the parent
        // itself lives in the managed namespace.
        if tree.node(component).kind == Kind::Namespace {
            continue;
        }
        let Some(parent) = tree.node(component).parent else {
            continue;
        };
        let parent_tasks = set.tasks_of(parent);

        match tree.mode() {
            Mode::Create => match tree.node(component).parent_relation {
                ParentRelation::After => {
                    for ptid in parent_tasks {
                        trace!(
                            task = %set.task(tid).name,
                            on = %set.task(ptid).name,
                            "task depends on parent task"
                        );
                        set.task_mut(tid).add_dependency(ptid);
                    }
                }
                ParentRelation::Before => {
                    for ptid in parent_tasks {
                        trace!(
                            task = %set.task(ptid).name,
                            on = %set.task(tid).name,
                            "parent task depends on task"
                        );
                        set.task_mut(ptid).add_dependency(tid);
                    }
                }
                ParentRelation::Independent => {}
            },
            // Teardown ignores declared relations; structure wins. A parent
            // is deleted only after all of its children are gone.
            Mode::Remove => {
                for ptid in parent_tasks {
                    set.task_mut(ptid).add_dependency(tid);
                }
            }
        }
    }
}

fn validate_acyclic(set: &TaskSet) -> Result<()> {
    for tid in set.ids() {
        let mut closure = BTreeSet::new();
        set.collect_closure(tid, &mut closure);
        if closure.contains(&tid) {
            return Err(EngineError::CircularTaskDependency(
                set.task(tid).name.clone(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::prepare_tree;
    use caravel_core::{ComponentDef, Config, Variables};

    fn built(yaml: &str, mode: Mode) -> (ComponentTree, TaskSet) {
        let def = ComponentDef::from_yaml(yaml).unwrap();
        let config = Config::default();
        let mut tree = ComponentTree::populate(&def, &config, &Variables::new(), mode).unwrap();
        tree.init(&config);
        prepare_tree(&mut tree, &config).unwrap();
        let set = build_tasks(&tree).unwrap();
        (tree, set)
    }

    fn task_named<'s>(set: &'s TaskSet, name: &str) -> &'s Task {
        set.ids()
            .into_iter()
            .map(|t| set.task(t))
            .find(|t| t.name == name)
            .unwrap()
    }

    const PARENT_CHILD: &str = r#"
name: web
kind: Deployment
children:
  - name: web-svc
    kind: Service
  - name: web-init
    kind: Job
    parentRelation: before
  - name: web-probe
    kind: Job
    parentRelation: independent
"#;

    #[test]
    fn test_app_contributes_no_task() {
        let (_, set) = built("name: app\nkind: App\n", Mode::Create);
        assert!(set.is_empty());
    }

    #[test]
    fn test_after_relation_edges() {
        let (tree, set) = built(PARENT_CHILD, Mode::Create);
        let web = tree.find_by_name("web")[0];
        let svc = task_named(&set, "web-svc");
        // Default relation: the child follows its parent.
        assert_eq!(svc.depends_on.len(), 1);
        assert_eq!(set.task(svc.depends_on[0]).component, web);
    }

    #[test]
    fn test_before_relation_edges() {
        let (tree, set) = built(PARENT_CHILD, Mode::Create);
        let init = tree.find_by_name("web-init")[0];
        let web = task_named(&set, "web");
        assert!(web
            .depends_on
            .iter()
            .any(|d| set.task(*d).component == init));
    }

    #[test]
    fn test_independent_relation_has_no_edges() {
        let (tree, set) = built(PARENT_CHILD, Mode::Create);
        let probe = task_named(&set, "web-probe");
        assert!(probe.depends_on.is_empty());
        let probe_id = tree.find_by_name("web-probe")[0];
        let web = task_named(&set, "web");
        assert!(!web.depends_on.iter().any(|d| set.task(*d).component == probe_id));
    }

    #[test]
    fn test_remove_mode_orders_children_first() {
        let (tree, set) = built(PARENT_CHILD, Mode::Remove);
        let web = task_named(&set, "web");
        // The parent's delete waits for every child's delete, including the
        // "before" and "independent" ones.
        let dep_components: Vec<ComponentId> =
            web.depends_on.iter().map(|d| set.task(*d).component).collect();
        for name in ["web-svc", "web-init", "web-probe"] {
            let id = tree.find_by_name(name)[0];
            assert!(dep_components.contains(&id), "missing delete edge for {name}");
        }
        // And the children themselves wait for nothing.
        assert!(task_named(&set, "web-svc").depends_on.is_empty());
    }

    #[test]
    fn test_workload_watch_rule() {
        let (_, set) = built(
            r#"
name: web
kind: Deployment
args:
  replicas: "2"
"#,
            Mode::Create,
        );
        let web = task_named(&set, "web");
        assert!(web.probe);
        let rule = web.watch.as_ref().unwrap();
        assert_eq!(rule.object_kind, "Pod");
        assert_eq!(rule.name_prefix, "web-");
        assert_eq!(rule.target, 2);
        assert_eq!(rule.namespace, "default");
    }

    #[test]
    fn test_passive_kind_has_no_watch_or_probe() {
        let (_, set) = built("name: cfg\nkind: ConfigMap\n", Mode::Create);
        let cfg = task_named(&set, "cfg");
        assert!(!cfg.probe);
        assert!(cfg.watch.is_none());
    }

    #[test]
    fn test_delete_tasks_have_no_watch() {
        let (_, set) = built(
            r#"
name: web
kind: Deployment
args:
  replicas: "2"
"#,
            Mode::Remove,
        );
        let web = task_named(&set, "web");
        assert_eq!(web.action, TaskAction::Delete);
        assert!(web.watch.is_none());
        assert!(web.probe);
    }

    #[test]
    fn test_auto_service_task_follows_deployment() {
        let (tree, set) = built(
            r#"
name: web
kind: Deployment
args:
  service.enabled: "true"
  port: "8080"
"#,
            Mode::Create,
        );
        let web = tree.find_by_name("web")[0];
        let svc = task_named(&set, "web-svc");
        assert_eq!(svc.depends_on.len(), 1);
        assert_eq!(set.task(svc.depends_on[0]).component, web);
    }
}
