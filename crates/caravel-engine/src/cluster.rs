//! One cluster's driver: connection, event watch, scheduler
//!
//! Every cluster gets its own replica of the component tree built from the
//! same definition, so runs against multiple clusters share nothing mutable.

use std::sync::Arc;

use caravel_core::{ComponentDef, Config, Variables};
use caravel_kube::{ClusterClient, EventWatcher, KubeApi, ResourceApi};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::component::{ComponentTree, Mode};
use crate::deps::scan_dependencies;
use crate::error::Result;
use crate::graph::build_tasks;
use crate::payload::prepare_tree;
use crate::scheduler::{Pulse, RunReport, Scheduler};

/// A cluster argument: `kubeconfig[:key=value,key=value,...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub kubeconfig: String,
    pub variables: Variables,
    pub name: String,
}

impl ClusterSpec {
    /// Parse the `kubeconfig[:k1=v1,...]` argument syntax.
    ///
    /// The cluster name comes from the `name` variable, falling back to the
    /// kubeconfig file's basename before its first dot, then to "default".
    pub fn parse(arg: &str) -> Self {
        let (kubeconfig, rest) = match arg.split_once(':') {
            Some((k, r)) => (k.to_string(), r),
            None => (arg.to_string(), ""),
        };

        let mut variables = Variables::new();
        for pair in rest.split(',').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((k, v)) => variables.insert(k.to_string(), v.to_string()),
                None => variables.insert(pair.to_string(), String::new()),
            };
        }

        let name = variables.get("name").cloned().unwrap_or_else(|| {
            let base = std::path::Path::new(&kubeconfig)
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stem = base.split('.').next().unwrap_or("");
            if stem.is_empty() {
                "default".to_string()
            } else {
                stem.to_string()
            }
        });
        variables.entry("name".to_string()).or_insert_with(|| name.clone());

        debug!(cluster = %name, kubeconfig = %kubeconfig, "parsed cluster argument");
        Self {
            kubeconfig,
            variables,
            name,
        }
    }
}

/// Drives one cluster to completion for the given mode
pub struct Cluster {
    spec: ClusterSpec,
    config: Config,
}

impl Cluster {
    pub fn new(spec: ClusterSpec, config: Config) -> Self {
        Self { spec, config }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Build the tree and task graph, connect, and run the scheduler
    pub async fn run(self, def: &ComponentDef, mode: Mode) -> Result<RunReport> {
        let tree = self.build_tree(def, mode)?;
        let tasks = build_tasks(&tree)?;
        info!(
            cluster = %self.spec.name,
            components = tree.len(),
            tasks = tasks.len(),
            "prepared"
        );

        let client = if self.spec.kubeconfig.is_empty() {
            ClusterClient::infer().await
        } else {
            ClusterClient::from_kubeconfig(
                &self.spec.kubeconfig,
                self.spec.variables.get("context").map(String::as_str),
            )
            .await
        }
        .map_err(crate::error::EngineError::Kube)?;

        let api: Arc<dyn ResourceApi> = Arc::new(KubeApi::new(&client));
        let scheduler = Scheduler::new(self.spec.name.clone(), tree, tasks, api, &self.config);

        // Wire the long-lived event watch into the reactor. The forwarder
        // dies with the scheduler when the pulse channel closes.
        let (event_tx, mut event_rx) = mpsc::channel(128);
        tokio::spawn(EventWatcher::new(client.kube_client(), event_tx).run());
        let pulses = scheduler.pulse_sender();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if pulses.send(Pulse::Event(Box::new(event))).await.is_err() {
                    break;
                }
            }
        });

        scheduler.run().await
    }

    /// Populate, init, prepare and scan: everything before any I/O
    pub fn build_tree(&self, def: &ComponentDef, mode: Mode) -> Result<ComponentTree> {
        let mut tree = ComponentTree::populate(def, &self.config, &self.spec.variables, mode)?;
        tree.init(&self.config);
        prepare_tree(&mut tree, &self.config)?;
        scan_dependencies(&mut tree)?;
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_kubeconfig() {
        let spec = ClusterSpec::parse("/home/me/prod.conf");
        assert_eq!(spec.kubeconfig, "/home/me/prod.conf");
        assert_eq!(spec.name, "prod");
        assert_eq!(spec.variables.get("name").unwrap(), "prod");
    }

    #[test]
    fn test_parse_with_variables() {
        let spec = ClusterSpec::parse("staging.yaml:namespace=edge,tier=b");
        assert_eq!(spec.kubeconfig, "staging.yaml");
        assert_eq!(spec.name, "staging");
        assert_eq!(spec.variables.get("namespace").unwrap(), "edge");
        assert_eq!(spec.variables.get("tier").unwrap(), "b");
    }

    #[test]
    fn test_parse_explicit_name_wins() {
        let spec = ClusterSpec::parse("prod.conf:name=eu-west");
        assert_eq!(spec.name, "eu-west");
    }

    #[test]
    fn test_parse_empty_kubeconfig_defaults_name() {
        let spec = ClusterSpec::parse("");
        assert_eq!(spec.kubeconfig, "");
        assert_eq!(spec.name, "default");
    }

    #[test]
    fn test_parse_ignores_empty_pairs() {
        let spec = ClusterSpec::parse("kc.yaml:,a=1,");
        assert_eq!(spec.variables.get("a").unwrap(), "1");
        assert!(!spec.variables.contains_key(""));
    }

    #[test]
    fn test_parse_bare_variable_is_empty() {
        let spec = ClusterSpec::parse("kc.yaml:flag");
        assert_eq!(spec.variables.get("flag").unwrap(), "");
    }
}
