//! Dependency scanning over a populated tree
//!
//! Two sources of component edges: namespace ownership (everything living
//! in a managed namespace follows the Namespace component) and the
//! `depends` lists from the definition. In remove mode every edge points
//! the other way, so dependents are torn down before their dependencies
//! and a managed namespace goes last.

use std::collections::BTreeMap;

use caravel_core::Kind;

use crate::component::{ComponentId, ComponentTree, Mode};
use crate::error::Result;

/// Derive every `depends_on` edge for the tree's mode.
///
/// Call after payload preparation: generated components (services, config
/// maps, the managed namespace) must already exist.
pub fn scan_dependencies(tree: &mut ComponentTree) -> Result<()> {
    let reverse = tree.mode() == Mode::Remove;

    // Namespace ownership: map each managed namespace name to its component.
    let mut namespaces: BTreeMap<String, ComponentId> = BTreeMap::new();
    for id in tree.ids() {
        let node = tree.node(id);
        if node.kind == Kind::Namespace {
            let managed = node
                .payload
                .name()
                .map(String::from)
                .unwrap_or_else(|| node.name.clone());
            namespaces.insert(managed, id);
        }
    }

    if !namespaces.is_empty() {
        for id in tree.ids() {
            let kind = tree.node(id).kind;
            if kind == Kind::Namespace || kind.is_abstract() || kind.is_cluster_scoped() {
                continue;
            }
            if let Some(&ns_id) = namespaces.get(&tree.namespace_for(id)) {
                if reverse {
                    tree.add_dependency(ns_id, id)?;
                } else {
                    tree.add_dependency(id, ns_id)?;
                }
            }
        }
    }

    // Named `depends` edges.
    for id in tree.ids() {
        for dep_name in tree.node(id).depends.clone() {
            for target in tree.find_by_name(&dep_name) {
                if target == id {
                    continue;
                }
                if reverse {
                    tree.add_dependency(target, id)?;
                } else {
                    tree.add_dependency(id, target)?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentState;
    use crate::payload::prepare_tree;
    use caravel_core::{ComponentDef, Config, Variables};

    fn scanned(yaml: &str, mode: Mode) -> ComponentTree {
        let def = ComponentDef::from_yaml(yaml).unwrap();
        let config = Config::default();
        let mut tree = ComponentTree::populate(&def, &config, &Variables::new(), mode).unwrap();
        tree.init(&config);
        prepare_tree(&mut tree, &config).unwrap();
        scan_dependencies(&mut tree).unwrap();
        tree
    }

    const NS_AND_DEPLOYMENT: &str = r#"
name: app
kind: App
children:
  - name: ns-a
    kind: Namespace
  - name: web
    kind: Deployment
    spec:
      metadata:
        namespace: ns-a
"#;

    #[test]
    fn test_namespace_edge_in_create_mode() {
        let tree = scanned(NS_AND_DEPLOYMENT, Mode::Create);
        let ns = tree.find_by_name("ns-a")[0];
        let web = tree.find_by_name("web")[0];

        assert_eq!(tree.node(web).depends_on, vec![ns]);
        assert!(tree.node(ns).depends_on.is_empty());
    }

    #[test]
    fn test_namespace_edge_reversed_in_remove_mode() {
        let tree = scanned(NS_AND_DEPLOYMENT, Mode::Remove);
        let ns = tree.find_by_name("ns-a")[0];
        let web = tree.find_by_name("web")[0];

        assert_eq!(tree.node(ns).depends_on, vec![web]);
        assert!(tree.node(web).depends_on.is_empty());
    }

    #[test]
    fn test_unrelated_namespace_gets_no_edge() {
        let tree = scanned(
            r#"
name: app
kind: App
children:
  - name: ns-a
    kind: Namespace
  - name: web
    kind: Deployment
    spec:
      metadata:
        namespace: other
"#,
            Mode::Create,
        );
        let web = tree.find_by_name("web")[0];
        assert!(tree.node(web).depends_on.is_empty());
    }

    const SIBLING_DEPENDS: &str = r#"
name: app
kind: App
children:
  - name: a
    kind: Deployment
  - name: b
    kind: Deployment
    depends: [a]
"#;

    #[test]
    fn test_depends_edge_in_create_mode() {
        let tree = scanned(SIBLING_DEPENDS, Mode::Create);
        let a = tree.find_by_name("a")[0];
        let b = tree.find_by_name("b")[0];
        assert_eq!(tree.node(b).depends_on, vec![a]);
    }

    #[test]
    fn test_depends_edge_reversed_in_remove_mode() {
        let tree = scanned(SIBLING_DEPENDS, Mode::Remove);
        let a = tree.find_by_name("a")[0];
        let b = tree.find_by_name("b")[0];
        assert_eq!(tree.node(a).depends_on, vec![b]);
    }

    #[test]
    fn test_mutual_depends_is_a_cycle() {
        let def = ComponentDef::from_yaml(
            r#"
name: app
kind: App
children:
  - name: a
    kind: Deployment
    depends: [b]
  - name: b
    kind: Deployment
    depends: [a]
"#,
        )
        .unwrap();
        let config = Config::default();
        let mut tree =
            ComponentTree::populate(&def, &config, &Variables::new(), Mode::Create).unwrap();
        tree.init(&config);
        prepare_tree(&mut tree, &config).unwrap();

        let err = scan_dependencies(&mut tree).unwrap_err();
        assert!(err.to_string().to_lowercase().contains("circular"));
    }

    #[test]
    fn test_dependency_paths_are_acyclic() {
        // With a -> b -> c in place, no reachable pair admits a back edge.
        let tree = scanned(
            r#"
name: app
kind: App
children:
  - name: a
    kind: Deployment
    depends: [b]
  - name: b
    kind: Deployment
    depends: [c]
  - name: c
    kind: Deployment
"#,
            Mode::Create,
        );
        let a = tree.find_by_name("a")[0];
        let c = tree.find_by_name("c")[0];
        // c must not (transitively) depend on a.
        assert!(tree.node(c).depends_on.is_empty());
        assert!(!tree.node(a).depends_on.is_empty());
    }

    #[test]
    fn test_blocking_follows_component_state() {
        let mut tree = scanned(SIBLING_DEPENDS, Mode::Create);
        let a = tree.find_by_name("a")[0];
        let b = tree.find_by_name("b")[0];
        assert!(tree.is_blocked_on_dependency(b));
        tree.set_state(a, ComponentState::Done);
        assert!(!tree.is_blocked_on_dependency(b));
    }
}
