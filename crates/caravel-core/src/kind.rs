//! The closed set of resource kinds a bundle can contain
//!
//! Every node in a bundle definition names one of these kinds. The textual
//! form is the Kubernetes CamelCase kind name; `App` is a caravel-only
//! grouping kind that carries no cluster resource of its own.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A resource kind supported in bundle definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    App,
    Job,
    Deployment,
    StatefulSet,
    Service,
    ConfigMap,
    Secret,
    PersistentVolume,
    Ingress,
    Namespace,
    DaemonSet,
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    ServiceAccount,
}

/// (group, version, plural) address of a kind's API collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiLocation {
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
}

impl Kind {
    /// All kinds, in apply-friendly declaration order
    pub const ALL: [Kind; 16] = [
        Kind::App,
        Kind::Job,
        Kind::Deployment,
        Kind::StatefulSet,
        Kind::Service,
        Kind::ConfigMap,
        Kind::Secret,
        Kind::PersistentVolume,
        Kind::Ingress,
        Kind::Namespace,
        Kind::DaemonSet,
        Kind::Role,
        Kind::ClusterRole,
        Kind::RoleBinding,
        Kind::ClusterRoleBinding,
        Kind::ServiceAccount,
    ];

    /// Canonical CamelCase name, as written in definitions and the wire format
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::App => "App",
            Kind::Job => "Job",
            Kind::Deployment => "Deployment",
            Kind::StatefulSet => "StatefulSet",
            Kind::Service => "Service",
            Kind::ConfigMap => "ConfigMap",
            Kind::Secret => "Secret",
            Kind::PersistentVolume => "PersistentVolume",
            Kind::Ingress => "Ingress",
            Kind::Namespace => "Namespace",
            Kind::DaemonSet => "DaemonSet",
            Kind::Role => "Role",
            Kind::ClusterRole => "ClusterRole",
            Kind::RoleBinding => "RoleBinding",
            Kind::ClusterRoleBinding => "ClusterRoleBinding",
            Kind::ServiceAccount => "ServiceAccount",
        }
    }

    /// Whether the resource lives outside any namespace
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            Kind::Namespace | Kind::PersistentVolume | Kind::ClusterRole | Kind::ClusterRoleBinding
        )
    }

    /// Workload kinds spawn pods; their tasks wait on cluster events or
    /// readiness probes instead of completing on the POST response.
    pub fn is_workload(&self) -> bool {
        matches!(
            self,
            Kind::Deployment | Kind::StatefulSet | Kind::DaemonSet | Kind::Job
        )
    }

    /// Grouping kinds carry no cluster resource
    pub fn is_abstract(&self) -> bool {
        matches!(self, Kind::App)
    }

    /// Where the kind's collection lives in the cluster API.
    ///
    /// Returns `None` for `App`. The kind set is closed, so no discovery
    /// round-trip is needed to address a collection.
    pub fn api_location(&self) -> Option<ApiLocation> {
        let loc = match self {
            Kind::App => return None,
            Kind::Job => ApiLocation {
                group: "batch",
                version: "v1",
                plural: "jobs",
            },
            Kind::Deployment => ApiLocation {
                group: "apps",
                version: "v1",
                plural: "deployments",
            },
            Kind::StatefulSet => ApiLocation {
                group: "apps",
                version: "v1",
                plural: "statefulsets",
            },
            Kind::DaemonSet => ApiLocation {
                group: "apps",
                version: "v1",
                plural: "daemonsets",
            },
            Kind::Service => ApiLocation {
                group: "",
                version: "v1",
                plural: "services",
            },
            Kind::ConfigMap => ApiLocation {
                group: "",
                version: "v1",
                plural: "configmaps",
            },
            Kind::Secret => ApiLocation {
                group: "",
                version: "v1",
                plural: "secrets",
            },
            Kind::PersistentVolume => ApiLocation {
                group: "",
                version: "v1",
                plural: "persistentvolumes",
            },
            Kind::Namespace => ApiLocation {
                group: "",
                version: "v1",
                plural: "namespaces",
            },
            Kind::ServiceAccount => ApiLocation {
                group: "",
                version: "v1",
                plural: "serviceaccounts",
            },
            Kind::Ingress => ApiLocation {
                group: "networking.k8s.io",
                version: "v1",
                plural: "ingresses",
            },
            Kind::Role => ApiLocation {
                group: "rbac.authorization.k8s.io",
                version: "v1",
                plural: "roles",
            },
            Kind::ClusterRole => ApiLocation {
                group: "rbac.authorization.k8s.io",
                version: "v1",
                plural: "clusterroles",
            },
            Kind::RoleBinding => ApiLocation {
                group: "rbac.authorization.k8s.io",
                version: "v1",
                plural: "rolebindings",
            },
            Kind::ClusterRoleBinding => ApiLocation {
                group: "rbac.authorization.k8s.io",
                version: "v1",
                plural: "clusterrolebindings",
            },
        };
        Some(loc)
    }
}

impl FromStr for Kind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| CoreError::UnknownKind(s.to_string()))
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for kind in Kind::ALL {
            assert_eq!(kind.as_str().parse::<Kind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind() {
        let err = "Deplyoment".parse::<Kind>().unwrap_err();
        assert!(err.to_string().contains("unknown kind"));
        assert!(err.to_string().contains("Deplyoment"));
    }

    #[test]
    fn test_scoping() {
        assert!(Kind::Namespace.is_cluster_scoped());
        assert!(Kind::ClusterRoleBinding.is_cluster_scoped());
        assert!(!Kind::Deployment.is_cluster_scoped());
        assert!(!Kind::Service.is_cluster_scoped());
    }

    #[test]
    fn test_workload_kinds() {
        assert!(Kind::Deployment.is_workload());
        assert!(Kind::Job.is_workload());
        assert!(!Kind::Service.is_workload());
        assert!(!Kind::App.is_workload());
    }

    #[test]
    fn test_api_locations() {
        let loc = Kind::Deployment.api_location().unwrap();
        assert_eq!(loc.group, "apps");
        assert_eq!(loc.plural, "deployments");

        let loc = Kind::Service.api_location().unwrap();
        assert_eq!(loc.group, "");
        assert_eq!(loc.plural, "services");

        assert!(Kind::App.api_location().is_none());
    }
}
