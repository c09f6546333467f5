//! Top-level coordination across clusters

use std::path::Path;

use caravel_core::{ComponentDef, Config, Variables};
use tracing::info;

use crate::cluster::{Cluster, ClusterSpec};
use crate::component::Mode;
use crate::dot::write_dot;
use crate::error::Result;
use crate::graph::build_tasks;
use crate::scheduler::RunReport;

/// What a run does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Deploy,
    Delete,
    /// Build the graphs and dump them as DOT instead of touching clusters
    ShowDependencies,
}

impl RunMode {
    /// The component-level direction this mode implies
    pub fn direction(&self) -> Mode {
        match self {
            RunMode::Delete => Mode::Remove,
            _ => Mode::Create,
        }
    }
}

/// Owns the run configuration and fans out over clusters
pub struct Engine {
    config: Config,
    mode: RunMode,
}

impl Engine {
    pub fn new(config: Config, mode: RunMode) -> Self {
        Self { config, mode }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Execute the run against every cluster concurrently.
    ///
    /// The definition file is loaded per cluster: each cluster expands the
    /// raw text with its own variables, so two clusters can deploy the same
    /// bundle with different values. Trees are never shared. In
    /// show-dependencies mode the graphs are written to
    /// `<rootname>-<dotfile>` and no cluster is contacted.
    pub async fn run(
        &self,
        definition: &Path,
        clusters: Vec<ClusterSpec>,
    ) -> Result<Vec<(String, Result<RunReport>)>> {
        if self.mode == RunMode::ShowDependencies {
            let vars = self.merged_vars(clusters.first());
            let def = ComponentDef::from_file(definition, &vars)?;
            let dot = self.render_dependencies(&def, &vars)?;
            let path = format!("{}-{}", def.name, self.config.dotfile);
            std::fs::write(&path, dot)?;
            info!(%path, "wrote dependency graphs");
            return Ok(Vec::new());
        }

        let direction = self.mode.direction();
        let runs = clusters.into_iter().map(|spec| {
            let config = self.config.clone();
            let vars = self.merged_vars(Some(&spec));
            let name = spec.name.clone();
            let path = definition.to_path_buf();
            async move {
                let result = match ComponentDef::from_file(&path, &vars) {
                    Ok(def) => Cluster::new(spec, config).run(&def, direction).await,
                    Err(e) => Err(e.into()),
                };
                (name, result)
            }
        });

        Ok(futures::future::join_all(runs).await)
    }

    /// Run variables overlaid with one cluster's own variables
    fn merged_vars(&self, cluster: Option<&ClusterSpec>) -> Variables {
        let mut vars = self.config.variables.clone();
        if let Some(cluster) = cluster {
            for (k, v) in &cluster.variables {
                vars.insert(k.clone(), v.clone());
            }
        }
        vars
    }

    /// Render the component and task graphs as DOT text
    pub fn render_dependencies(&self, def: &ComponentDef, vars: &Variables) -> Result<String> {
        let spec = ClusterSpec {
            kubeconfig: String::new(),
            variables: vars.clone(),
            name: "graph".to_string(),
        };
        let tree = Cluster::new(spec, self.config.clone()).build_tree(def, Mode::Create)?;
        let tasks = build_tasks(&tree)?;

        let mut buf = Vec::new();
        write_dot(&tree, &tasks, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_direction() {
        assert_eq!(RunMode::Deploy.direction(), Mode::Create);
        assert_eq!(RunMode::ShowDependencies.direction(), Mode::Create);
        assert_eq!(RunMode::Delete.direction(), Mode::Remove);
    }

    #[test]
    fn test_render_dependencies() {
        let def = ComponentDef::from_yaml(
            r#"
name: shop
kind: App
children:
  - name: db
    kind: StatefulSet
  - name: api
    kind: Deployment
    depends: [db]
"#,
        )
        .unwrap();
        let engine = Engine::new(Config::default(), RunMode::ShowDependencies);
        let dot = engine
            .render_dependencies(&def, &Variables::new())
            .unwrap();
        assert!(dot.contains("\"Deployment/api\" -> \"StatefulSet/db\""));
    }
}
