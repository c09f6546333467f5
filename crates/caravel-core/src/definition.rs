//! Declarative bundle definitions
//!
//! A definition is a tree of nodes, each naming a resource kind, carrying
//! arguments and an optional kind-specific payload fragment. The file is
//! YAML or JSON; variable expansion runs over the raw text before parsing.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::ArgMap;
use crate::error::{CoreError, Result};
use crate::vars::{expand_variables, Variables};

/// How a component is ordered relative to its parent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentRelation {
    /// The component must be applied before its parent
    Before,
    /// The component is applied after its parent (the default)
    #[default]
    After,
    /// No ordering relative to the parent
    Independent,
}

/// One node of a bundle definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComponentDef {
    pub name: String,

    /// Resource kind name, e.g. "Deployment"; validated at populate time
    pub kind: String,

    #[serde(default, skip_serializing_if = "ArgMap::is_empty")]
    pub labels: ArgMap,

    /// Local arguments; always win over inherited defaults
    #[serde(default, skip_serializing_if = "ArgMap::is_empty")]
    pub args: ArgMap,

    /// Defaults inherited by this node's whole subtree
    #[serde(default, skip_serializing_if = "ArgMap::is_empty")]
    pub default_args: ArgMap,

    /// Names of components this one must follow
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,

    #[serde(default)]
    pub parent_relation: ParentRelation,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ComponentDef>,

    /// Kind-specific resource payload fragment, deserialized into the
    /// typed resource at populate time
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
}

impl ComponentDef {
    /// Load a definition file, expanding `${...}` variables first.
    ///
    /// The format is chosen by extension: `.yaml`/`.yml` or `.json`.
    pub fn from_file(path: impl AsRef<Path>, vars: &Variables) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let expanded = expand_variables(&raw, vars)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&expanded)?),
            Some("json") => Ok(serde_json::from_str(&expanded)?),
            _ => Err(CoreError::UnknownExtension(path.display().to_string())),
        }
    }

    /// Parse a definition from YAML text (used by tests and embedding)
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Total number of nodes in this subtree
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ComponentDef::count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let def = ComponentDef::from_yaml("name: web\nkind: Deployment\n").unwrap();
        assert_eq!(def.name, "web");
        assert_eq!(def.kind, "Deployment");
        assert_eq!(def.parent_relation, ParentRelation::After);
        assert!(def.children.is_empty());
    }

    #[test]
    fn test_parse_nested() {
        let def = ComponentDef::from_yaml(
            r#"
name: app
kind: App
defaultArgs:
  replicas: "2"
children:
  - name: web
    kind: Deployment
    args:
      image: nginx
    parentRelation: after
  - name: cache
    kind: Deployment
    depends: [web]
    parentRelation: independent
"#,
        )
        .unwrap();
        assert_eq!(def.count(), 3);
        assert_eq!(def.default_args.get("replicas").unwrap(), "2");
        assert_eq!(def.children[1].depends, vec!["web"]);
        assert_eq!(def.children[1].parent_relation, ParentRelation::Independent);
    }

    #[test]
    fn test_parse_payload_fragment() {
        let def = ComponentDef::from_yaml(
            r#"
name: web
kind: Deployment
spec:
  replicas: 3
"#,
        )
        .unwrap();
        assert_eq!(def.spec["replicas"], 3);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ComponentDef::from_yaml("name: x\nkind: App\nbogus: 1\n").is_err());
    }
}
