//! The component tree
//!
//! Components are arena-allocated; every edge (parent, children,
//! `depends_on`) is a handle into the arena. That keeps the ownership
//! tree and the dependency DAG free of reference cycles and makes cycle
//! detection a plain DFS over indices.

use std::collections::BTreeSet;
use std::time::Instant;

use caravel_core::{
    merge_args, ArgMap, ComponentDef, Config, EffectiveArgs, Kind, ParentRelation, Variables,
};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::payload::Payload;

/// Handle to a component in its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub(crate) usize);

/// Whether this run creates or removes resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Remove,
}

/// Component lifecycle state; order matters, failure sorts last
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComponentState {
    Creating,
    Running,
    Done,
    Failed,
}

/// A node in the deployment tree
#[derive(Debug)]
pub struct Component {
    pub name: String,
    pub kind: Kind,
    pub labels: ArgMap,
    pub args: ArgMap,
    pub default_args: ArgMap,
    pub depends: Vec<String>,
    pub parent_relation: ParentRelation,
    pub parent: Option<ComponentId>,
    pub children: Vec<ComponentId>,
    pub depends_on: Vec<ComponentId>,
    pub effective_args: EffectiveArgs,
    pub state: ComponentState,
    pub payload: Payload,
    pub start_time: Option<Instant>,
    pub elapsed: Option<f64>,
}

/// Arena of components for one cluster's run
#[derive(Debug)]
pub struct ComponentTree {
    nodes: Vec<Component>,
    mode: Mode,
    default_namespace: String,
    cluster_vars: Variables,
}

impl ComponentTree {
    /// Build a tree from a definition, applying the name filters.
    ///
    /// Filtered nodes are dropped with their whole subtree. Filtering away
    /// the root leaves nothing to run and is an error.
    pub fn populate(
        def: &ComponentDef,
        config: &Config,
        cluster_vars: &Variables,
        mode: Mode,
    ) -> Result<Self> {
        let filters = config.name_filters()?;
        let mut tree = Self {
            nodes: Vec::with_capacity(def.count()),
            mode,
            default_namespace: config.namespace.clone(),
            cluster_vars: cluster_vars.clone(),
        };

        if tree.insert(def, None, &filters)?.is_none() {
            return Err(caravel_core::CoreError::InvalidDefinition(format!(
                "root component '{}' is excluded by the name filters",
                def.name
            ))
            .into());
        }

        Ok(tree)
    }

    fn insert(
        &mut self,
        def: &ComponentDef,
        parent: Option<ComponentId>,
        filters: &caravel_core::NameFilters,
    ) -> Result<Option<ComponentId>> {
        if !filters.keeps(&def.name) {
            info!(name = %def.name, "excluding filtered component");
            return Ok(None);
        }

        let kind: Kind = def.kind.parse().map_err(EngineError::Core)?;
        let payload = Payload::from_def(kind, &def.spec)?;

        let id = ComponentId(self.nodes.len());
        self.nodes.push(Component {
            name: def.name.clone(),
            kind,
            labels: def.labels.clone(),
            args: def.args.clone(),
            default_args: def.default_args.clone(),
            depends: def.depends.clone(),
            parent_relation: def.parent_relation,
            parent,
            children: Vec::new(),
            depends_on: Vec::new(),
            effective_args: EffectiveArgs::default(),
            state: ComponentState::Creating,
            payload,
            start_time: None,
            elapsed: None,
        });

        for child_def in &def.children {
            if let Some(child) = self.insert(child_def, Some(id), filters)? {
                self.nodes[id.0].children.push(child);
            }
        }

        Ok(Some(id))
    }

    /// Resolve effective arguments everywhere and add automatic children.
    ///
    /// With `auto_maintain_namespace`, the root gets a Namespace child
    /// managing the run's namespace unless the definition already has one.
    pub fn init(&mut self, config: &Config) {
        for id in self.ids() {
            self.resolve_args(id);
        }

        if config.auto_maintain_namespace && !self.has_kind_as_child(self.root(), Kind::Namespace) {
            let ns = self.namespace_for(self.root());
            debug!(namespace = %ns, "adding managed namespace component");
            self.add_child(
                self.root(),
                format!("{ns}-ns"),
                Kind::Namespace,
                ArgMap::new(),
                ArgMap::new(),
                Payload::namespace_named(&ns),
            );
        }
    }

    /// Append a generated child component; its arguments resolve immediately
    pub fn add_child(
        &mut self,
        parent: ComponentId,
        name: String,
        kind: Kind,
        labels: ArgMap,
        args: ArgMap,
        payload: Payload,
    ) -> ComponentId {
        let id = ComponentId(self.nodes.len());
        self.nodes.push(Component {
            name,
            kind,
            labels,
            args,
            default_args: ArgMap::new(),
            depends: Vec::new(),
            parent_relation: ParentRelation::After,
            parent: Some(parent),
            children: Vec::new(),
            depends_on: Vec::new(),
            effective_args: EffectiveArgs::default(),
            state: ComponentState::Creating,
            payload,
            start_time: None,
            elapsed: None,
        });
        self.nodes[parent.0].children.push(id);
        self.resolve_args(id);
        id
    }

    /// Merge local args with `defaultArgs` along the path to the root.
    ///
    /// The node's own `defaultArgs` participate too, nearest-first.
    fn resolve_args(&mut self, id: ComponentId) {
        let mut chain: Vec<&ArgMap> = Vec::new();
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            chain.push(&self.nodes[c.0].default_args);
            cursor = self.nodes[c.0].parent;
        }
        let merged = merge_args(&self.nodes[id.0].args, chain.into_iter());
        self.nodes[id.0].effective_args = EffectiveArgs::new(merged);
    }

    // ===== Accessors =====

    pub fn root(&self) -> ComponentId {
        ComponentId(0)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ComponentId) -> &Component {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: ComponentId) -> &mut Component {
        &mut self.nodes[id.0]
    }

    /// All handles in arena order (parents precede the children they came
    /// with; generated children sit at the end)
    pub fn ids(&self) -> Vec<ComponentId> {
        (0..self.nodes.len()).map(ComponentId).collect()
    }

    /// Find components by name (names need not be globally unique)
    pub fn find_by_name(&self, name: &str) -> Vec<ComponentId> {
        self.ids()
            .into_iter()
            .filter(|id| self.nodes[id.0].name == name)
            .collect()
    }

    pub fn log_name(&self, id: ComponentId) -> String {
        let node = &self.nodes[id.0];
        format!("{}/{}", node.kind, node.name)
    }

    /// The namespace this component's resource lands in.
    ///
    /// Nearest explicit payload namespace wins, then the cluster variable
    /// `namespace`, then the configured default.
    pub fn namespace_for(&self, id: ComponentId) -> String {
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            if let Some(ns) = self.nodes[c.0].payload.namespace() {
                return ns.to_string();
            }
            cursor = self.nodes[c.0].parent;
        }
        self.cluster_vars
            .get("namespace")
            .cloned()
            .unwrap_or_else(|| self.default_namespace.clone())
    }

    /// The `app` selector label, defaulting to the component name
    pub fn selector(&self, id: ComponentId) -> (String, String) {
        let node = &self.nodes[id.0];
        match node.labels.get("app") {
            Some(v) => ("app".to_string(), v.clone()),
            None => ("app".to_string(), node.name.clone()),
        }
    }

    pub fn has_kind_as_child(&self, id: ComponentId, kind: Kind) -> bool {
        self.nodes[id.0]
            .children
            .iter()
            .any(|c| self.nodes[c.0].kind == kind)
    }

    pub fn first_child_of_kind(&self, id: ComponentId, kind: Kind) -> Option<ComponentId> {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].kind == kind)
    }

    // ===== Dependency edges =====

    /// Insert a weak edge `from -> to` (from must wait for to).
    ///
    /// Self-edges are refused, duplicates are skipped, and an edge that
    /// would close a cycle is rejected: the check walks `to`'s transitive
    /// dependencies looking for `from`.
    pub fn add_dependency(&mut self, from: ComponentId, to: ComponentId) -> Result<()> {
        if from == to {
            return Err(EngineError::SelfDependency(self.log_name(from)));
        }

        let mut closure = BTreeSet::new();
        self.collect_depends(to, &mut closure);
        if closure.contains(&from) {
            warn!(
                from = %self.log_name(from),
                to = %self.log_name(to),
                "rejecting dependency edge: would create a cycle"
            );
            return Err(EngineError::CircularDependency {
                from: self.log_name(from),
                to: self.log_name(to),
            });
        }

        if !self.nodes[from.0].depends_on.contains(&to) {
            debug!(from = %self.log_name(from), to = %self.log_name(to), "component depends on");
            self.nodes[from.0].depends_on.push(to);
        }
        Ok(())
    }

    fn collect_depends(&self, id: ComponentId, acc: &mut BTreeSet<ComponentId>) {
        for dep in &self.nodes[id.0].depends_on {
            if acc.insert(*dep) {
                self.collect_depends(*dep, acc);
            }
        }
    }

    /// Whether any component this one depends on has not finished
    pub fn is_blocked_on_dependency(&self, id: ComponentId) -> bool {
        self.nodes[id.0]
            .depends_on
            .iter()
            .any(|dep| self.nodes[dep.0].state != ComponentState::Done)
    }

    // ===== State =====

    /// Start the elapsed timer once, when the first task begins executing
    pub fn start_timer(&mut self, id: ComponentId) {
        let node = &mut self.nodes[id.0];
        if node.start_time.is_none() {
            node.start_time = Some(Instant::now());
        }
    }

    /// Transition a component's state, computing elapsed time on completion
    pub fn set_state(&mut self, id: ComponentId, state: ComponentState) -> bool {
        let name = self.log_name(id);
        let node = &mut self.nodes[id.0];
        if node.state == state {
            return false;
        }

        if state >= ComponentState::Done {
            node.elapsed = node.start_time.map(|t| t.elapsed().as_secs_f64());
            let elapsed = node.elapsed.unwrap_or(0.0);
            match state {
                ComponentState::Done => info!(component = %name, elapsed, "done"),
                _ => warn!(component = %name, elapsed, "failed"),
            }
        }

        node.state = state;
        true
    }
}
