//! Kind-specific resource payloads and their preparation
//!
//! Each component owns the typed resource it will apply. Preparation fills
//! in whatever the user left out (names, namespaces, selector labels,
//! synthesized containers) and injects derived children: a Service for a
//! workload asking for one, a ConfigMap mounted as a volume for
//! `config.fromFile`. Serialization happens exactly once, at dispatch,
//! where the k8s-openapi serde renames take care of reserved wire names
//! like `namespace` and `continue`.

use std::collections::BTreeMap;

use caravel_core::{ArgMap, Config, EffectiveArgs, Kind};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, KeyToPath, Namespace,
    PersistentVolume, PodSpec, PodTemplateSpec, Secret, Service, ServiceAccount, ServicePort,
    Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use k8s_openapi::Resource;
use serde_json::Value;
use tracing::debug;

use crate::component::{ComponentId, ComponentTree};
use crate::error::Result;

/// The typed resource a component applies, tagged by kind
#[derive(Debug, Default)]
pub enum Payload {
    /// Grouping node; carries no cluster resource
    #[default]
    App,
    Deployment(Box<Deployment>),
    StatefulSet(Box<StatefulSet>),
    DaemonSet(Box<DaemonSet>),
    Job(Box<Job>),
    Service(Box<Service>),
    ConfigMap(Box<ConfigMap>),
    Secret(Box<Secret>),
    PersistentVolume(Box<PersistentVolume>),
    Ingress(Box<Ingress>),
    Namespace(Box<Namespace>),
    Role(Box<Role>),
    ClusterRole(Box<ClusterRole>),
    RoleBinding(Box<RoleBinding>),
    ClusterRoleBinding(Box<ClusterRoleBinding>),
    ServiceAccount(Box<ServiceAccount>),
}

impl Payload {
    /// Deserialize a definition's payload fragment into the kind's type.
    ///
    /// A null fragment yields the kind's empty payload.
    pub fn from_def(kind: Kind, fragment: &Value) -> Result<Self> {
        if fragment.is_null() {
            return Ok(Self::default_for(kind));
        }
        let fragment = fragment.clone();
        let payload = match kind {
            Kind::App => Payload::App,
            Kind::Deployment => Payload::Deployment(serde_json::from_value(fragment)?),
            Kind::StatefulSet => Payload::StatefulSet(serde_json::from_value(fragment)?),
            Kind::DaemonSet => Payload::DaemonSet(serde_json::from_value(fragment)?),
            Kind::Job => Payload::Job(serde_json::from_value(fragment)?),
            Kind::Service => Payload::Service(serde_json::from_value(fragment)?),
            Kind::ConfigMap => Payload::ConfigMap(serde_json::from_value(fragment)?),
            Kind::Secret => Payload::Secret(serde_json::from_value(fragment)?),
            Kind::PersistentVolume => Payload::PersistentVolume(serde_json::from_value(fragment)?),
            Kind::Ingress => Payload::Ingress(serde_json::from_value(fragment)?),
            Kind::Namespace => Payload::Namespace(serde_json::from_value(fragment)?),
            Kind::Role => Payload::Role(serde_json::from_value(fragment)?),
            Kind::ClusterRole => Payload::ClusterRole(serde_json::from_value(fragment)?),
            Kind::RoleBinding => Payload::RoleBinding(serde_json::from_value(fragment)?),
            Kind::ClusterRoleBinding => {
                Payload::ClusterRoleBinding(serde_json::from_value(fragment)?)
            }
            Kind::ServiceAccount => Payload::ServiceAccount(serde_json::from_value(fragment)?),
        };
        Ok(payload)
    }

    /// The kind's empty payload
    pub fn default_for(kind: Kind) -> Self {
        match kind {
            Kind::App => Payload::App,
            Kind::Deployment => Payload::Deployment(Default::default()),
            Kind::StatefulSet => Payload::StatefulSet(Default::default()),
            Kind::DaemonSet => Payload::DaemonSet(Default::default()),
            Kind::Job => Payload::Job(Default::default()),
            Kind::Service => Payload::Service(Default::default()),
            Kind::ConfigMap => Payload::ConfigMap(Default::default()),
            Kind::Secret => Payload::Secret(Default::default()),
            Kind::PersistentVolume => Payload::PersistentVolume(Default::default()),
            Kind::Ingress => Payload::Ingress(Default::default()),
            Kind::Namespace => Payload::Namespace(Default::default()),
            Kind::Role => Payload::Role(Default::default()),
            Kind::ClusterRole => Payload::ClusterRole(Default::default()),
            Kind::RoleBinding => Payload::RoleBinding(Default::default()),
            Kind::ClusterRoleBinding => Payload::ClusterRoleBinding(Default::default()),
            Kind::ServiceAccount => Payload::ServiceAccount(Default::default()),
        }
    }

    /// A Namespace payload managing the given namespace name
    pub fn namespace_named(ns: &str) -> Self {
        Payload::Namespace(Box::new(Namespace {
            metadata: ObjectMeta {
                name: Some(ns.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    fn metadata(&self) -> Option<&ObjectMeta> {
        match self {
            Payload::App => None,
            Payload::Deployment(r) => Some(&r.metadata),
            Payload::StatefulSet(r) => Some(&r.metadata),
            Payload::DaemonSet(r) => Some(&r.metadata),
            Payload::Job(r) => Some(&r.metadata),
            Payload::Service(r) => Some(&r.metadata),
            Payload::ConfigMap(r) => Some(&r.metadata),
            Payload::Secret(r) => Some(&r.metadata),
            Payload::PersistentVolume(r) => Some(&r.metadata),
            Payload::Ingress(r) => Some(&r.metadata),
            Payload::Namespace(r) => Some(&r.metadata),
            Payload::Role(r) => Some(&r.metadata),
            Payload::ClusterRole(r) => Some(&r.metadata),
            Payload::RoleBinding(r) => Some(&r.metadata),
            Payload::ClusterRoleBinding(r) => Some(&r.metadata),
            Payload::ServiceAccount(r) => Some(&r.metadata),
        }
    }

    /// The resource's metadata name, once prepared
    pub fn name(&self) -> Option<&str> {
        self.metadata().and_then(|m| m.name.as_deref())
    }

    /// The resource's explicit metadata namespace, if any
    pub fn namespace(&self) -> Option<&str> {
        self.metadata().and_then(|m| m.namespace.as_deref())
    }

    /// How many pod-created events complete this payload's task
    pub fn event_target(&self) -> i32 {
        match self {
            Payload::Deployment(r) => r.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            Payload::StatefulSet(r) => r.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            Payload::Job(r) => r.spec.as_ref().and_then(|s| s.completions).unwrap_or(1),
            _ => 1,
        }
    }

    /// The full wire object, including `apiVersion` and `kind`
    pub fn manifest(&self) -> Result<Value> {
        fn wire<K: Resource + serde::Serialize>(resource: &K) -> Result<Value> {
            let mut value = serde_json::to_value(resource)?;
            if let Value::Object(map) = &mut value {
                map.insert("apiVersion".to_string(), K::API_VERSION.into());
                map.insert("kind".to_string(), K::KIND.into());
            }
            Ok(value)
        }

        match self {
            Payload::App => Ok(Value::Null),
            Payload::Deployment(r) => wire(r.as_ref()),
            Payload::StatefulSet(r) => wire(r.as_ref()),
            Payload::DaemonSet(r) => wire(r.as_ref()),
            Payload::Job(r) => wire(r.as_ref()),
            Payload::Service(r) => wire(r.as_ref()),
            Payload::ConfigMap(r) => wire(r.as_ref()),
            Payload::Secret(r) => wire(r.as_ref()),
            Payload::PersistentVolume(r) => wire(r.as_ref()),
            Payload::Ingress(r) => wire(r.as_ref()),
            Payload::Namespace(r) => wire(r.as_ref()),
            Payload::Role(r) => wire(r.as_ref()),
            Payload::ClusterRole(r) => wire(r.as_ref()),
            Payload::RoleBinding(r) => wire(r.as_ref()),
            Payload::ClusterRoleBinding(r) => wire(r.as_ref()),
            Payload::ServiceAccount(r) => wire(r.as_ref()),
        }
    }
}

/// Prepare every component's payload, visiting injected children too
pub fn prepare_tree(tree: &mut ComponentTree, config: &Config) -> Result<()> {
    let mut stack = vec![tree.root()];
    while let Some(id) = stack.pop() {
        prepare_component(tree, id, config)?;
        let mut children = tree.node(id).children.clone();
        children.reverse();
        stack.extend(children);
    }
    Ok(())
}

/// Prepare one component's payload in place.
///
/// Idempotent: preparing twice changes nothing, so a parent may eagerly
/// prepare an injected child it needs data from.
pub fn prepare_component(tree: &mut ComponentTree, id: ComponentId, config: &Config) -> Result<()> {
    let mut payload = std::mem::take(&mut tree.node_mut(id).payload);
    let result = match &mut payload {
        Payload::App => Ok(()),
        Payload::Deployment(dep) => prepare_deployment(tree, id, dep, config),
        Payload::StatefulSet(sts) => prepare_statefulset(tree, id, sts, config),
        Payload::DaemonSet(ds) => prepare_daemonset(tree, id, ds),
        Payload::Job(job) => prepare_job(tree, id, job),
        Payload::Service(svc) => prepare_service(tree, id, svc),
        Payload::ConfigMap(cm) => prepare_configmap(tree, id, cm),
        Payload::Namespace(ns) => prepare_namespace(tree, id, ns),
        Payload::Secret(r) => Ok(fill_metadata(tree, id, &mut r.metadata, false)),
        Payload::PersistentVolume(r) => Ok(fill_metadata(tree, id, &mut r.metadata, true)),
        Payload::Ingress(r) => Ok(fill_metadata(tree, id, &mut r.metadata, false)),
        Payload::Role(r) => Ok(fill_metadata(tree, id, &mut r.metadata, false)),
        Payload::ClusterRole(r) => Ok(fill_metadata(tree, id, &mut r.metadata, true)),
        Payload::RoleBinding(r) => Ok(fill_metadata(tree, id, &mut r.metadata, false)),
        Payload::ClusterRoleBinding(r) => Ok(fill_metadata(tree, id, &mut r.metadata, true)),
        Payload::ServiceAccount(r) => Ok(fill_metadata(tree, id, &mut r.metadata, false)),
    };
    tree.node_mut(id).payload = payload;
    result
}

/// Default the metadata name and (for namespaced kinds) namespace
fn fill_metadata(tree: &ComponentTree, id: ComponentId, meta: &mut ObjectMeta, cluster_scoped: bool) {
    if meta.name.is_none() {
        meta.name = Some(tree.node(id).name.clone());
    }
    if !cluster_scoped && meta.namespace.is_none() {
        meta.namespace = Some(tree.namespace_for(id));
    }
    let labels = &tree.node(id).labels;
    if !labels.is_empty() {
        let meta_labels = meta.labels.get_or_insert_with(BTreeMap::new);
        for (k, v) in labels {
            meta_labels.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

fn insert_label(labels: &mut Option<BTreeMap<String, String>>, key: &str, value: &str) {
    labels
        .get_or_insert_with(BTreeMap::new)
        .entry(key.to_string())
        .or_insert_with(|| value.to_string());
}

/// Synthesize the single container a bare workload definition implies
fn build_container(name: &str, args: &EffectiveArgs) -> Result<Container> {
    let mut container = Container {
        name: name.to_string(),
        image: Some(args.get_or("image", name)),
        ..Default::default()
    };

    if args.get("port").is_some() {
        let port = ContainerPort {
            container_port: args.get_int("port", 0)? as i32,
            name: Some("default".to_string()),
            protocol: args.get("protocol").map(String::from),
            ..Default::default()
        };
        container.ports = Some(vec![port]);
    }

    let env = args.get_env_list("pod.env");
    if !env.is_empty() {
        container.env = Some(
            env.into_iter()
                .map(|(name, value)| EnvVar {
                    name,
                    value: (!value.is_empty()).then_some(value),
                    ..Default::default()
                })
                .collect(),
        );
    }

    let pod_args = args.get_string_list("pod.args");
    if !pod_args.is_empty() {
        container.args = Some(pod_args);
    }

    Ok(container)
}

/// Fill pod-template metadata and make sure a container exists
fn prepare_pod_template<'a>(
    template: &'a mut PodTemplateSpec,
    name: &str,
    selector: &(String, String),
    args: &EffectiveArgs,
) -> Result<&'a mut PodSpec> {
    let meta = template.metadata.get_or_insert_with(Default::default);
    if meta.name.is_none() {
        meta.name = Some(name.to_string());
    }
    insert_label(&mut meta.labels, &selector.0, &selector.1);

    let pod = template.spec.get_or_insert_with(Default::default);
    if pod.containers.is_empty() {
        pod.containers.push(build_container(name, args)?);
    }
    Ok(pod)
}

fn prepare_deployment(
    tree: &mut ComponentTree,
    id: ComponentId,
    dep: &mut Deployment,
    config: &Config,
) -> Result<()> {
    let name = tree.node(id).name.clone();
    let selector = tree.selector(id);
    let args = tree.node(id).effective_args.clone();

    fill_metadata(tree, id, &mut dep.metadata, false);
    insert_label(&mut dep.metadata.labels, &selector.0, &selector.1);

    let spec = dep.spec.get_or_insert_with(Default::default);
    if args.get("replicas").is_some() {
        spec.replicas = Some(args.get_int("replicas", 1)? as i32);
    }
    insert_label(&mut spec.selector.match_labels, &selector.0, &selector.1);
    prepare_pod_template(&mut spec.template, &name, &selector, &args)?;

    inject_service_child(tree, id, &args)?;
    if let Some(pod) = spec.template.spec.as_mut() {
        inject_configmap_volume(tree, id, &args, config, pod)?;
    }

    Ok(())
}

fn prepare_statefulset(
    tree: &mut ComponentTree,
    id: ComponentId,
    sts: &mut StatefulSet,
    config: &Config,
) -> Result<()> {
    let name = tree.node(id).name.clone();
    let selector = tree.selector(id);
    let args = tree.node(id).effective_args.clone();

    fill_metadata(tree, id, &mut sts.metadata, false);
    insert_label(&mut sts.metadata.labels, &selector.0, &selector.1);

    let spec = sts.spec.get_or_insert_with(Default::default);
    if args.get("replicas").is_some() {
        spec.replicas = Some(args.get_int("replicas", 1)? as i32);
    }
    insert_label(&mut spec.selector.match_labels, &selector.0, &selector.1);
    prepare_pod_template(&mut spec.template, &name, &selector, &args)?;

    inject_service_child(tree, id, &args)?;

    // A stateful set addresses its pods through a service; default to the
    // child service's name.
    if spec.service_name.is_empty() {
        spec.service_name = tree
            .first_child_of_kind(id, Kind::Service)
            .map(|c| tree.node(c).name.clone())
            .unwrap_or_else(|| format!("{name}-svc"));
    }

    if let Some(pod) = spec.template.spec.as_mut() {
        inject_configmap_volume(tree, id, &args, config, pod)?;
    }

    Ok(())
}

fn prepare_daemonset(tree: &mut ComponentTree, id: ComponentId, ds: &mut DaemonSet) -> Result<()> {
    let name = tree.node(id).name.clone();
    let selector = tree.selector(id);
    let args = tree.node(id).effective_args.clone();

    fill_metadata(tree, id, &mut ds.metadata, false);
    insert_label(&mut ds.metadata.labels, &selector.0, &selector.1);

    let spec = ds.spec.get_or_insert_with(Default::default);
    insert_label(&mut spec.selector.match_labels, &selector.0, &selector.1);
    prepare_pod_template(&mut spec.template, &name, &selector, &args)?;
    Ok(())
}

fn prepare_job(tree: &mut ComponentTree, id: ComponentId, job: &mut Job) -> Result<()> {
    let name = tree.node(id).name.clone();
    let selector = tree.selector(id);
    let args = tree.node(id).effective_args.clone();

    fill_metadata(tree, id, &mut job.metadata, false);

    let spec = job.spec.get_or_insert_with(Default::default);
    if args.get("completions").is_some() {
        spec.completions = Some(args.get_int("completions", 1)? as i32);
    }
    let pod = prepare_pod_template(&mut spec.template, &name, &selector, &args)?;
    if pod.restart_policy.is_none() {
        pod.restart_policy = Some("Never".to_string());
    }
    Ok(())
}

fn prepare_service(tree: &mut ComponentTree, id: ComponentId, svc: &mut Service) -> Result<()> {
    let selector = tree.selector(id);
    let args = tree.node(id).effective_args.clone();

    fill_metadata(tree, id, &mut svc.metadata, false);
    insert_label(&mut svc.metadata.labels, &selector.0, &selector.1);

    let spec = svc.spec.get_or_insert_with(Default::default);
    insert_label(&mut spec.selector, &selector.0, &selector.1);

    if spec.type_.is_none() {
        if let Some(t) = args.get("service.type") {
            spec.type_ = Some(t.to_string());
        } else if args.get("service.nodePort").is_some() {
            spec.type_ = Some("NodePort".to_string());
        }
    }

    if spec.ports.as_ref().map_or(true, |p| p.is_empty()) {
        // Derive ports from the parent workload's containers.
        let containers = tree
            .node(id)
            .parent
            .map(|p| parent_containers(&tree.node(p).payload))
            .unwrap_or_default();

        let mut ports = Vec::new();
        for container in &containers {
            for dp in container.ports.iter().flatten() {
                let count = ports.len() + 1;

                let mut port = dp.host_port.unwrap_or(0);
                if count == 1 && port <= 0 {
                    port = args.get_int("port", i64::from(dp.container_port))? as i32;
                }
                if port <= 0 {
                    port = dp.container_port;
                }

                let (port_name, target) = match dp.name.as_deref() {
                    Some(n) if !n.is_empty() => {
                        (n.to_string(), IntOrString::String(n.to_string()))
                    }
                    _ => (format!("sport-{count}"), IntOrString::Int(dp.container_port)),
                };

                let node_port = if count == 1 {
                    let np = args.get_int("service.nodePort", 0)?;
                    (np > 0).then_some(np as i32)
                } else {
                    None
                };

                debug!(service = %tree.log_name(id), port = %port_name, "derived service port");
                ports.push(ServicePort {
                    name: Some(port_name),
                    port,
                    target_port: Some(target),
                    node_port,
                    protocol: dp.protocol.clone(),
                    ..Default::default()
                });
            }
        }

        if !ports.is_empty() {
            spec.ports = Some(ports);
        }
    }

    Ok(())
}

fn parent_containers(payload: &Payload) -> Vec<Container> {
    let template = match payload {
        Payload::Deployment(dep) => dep.spec.as_ref().map(|s| &s.template),
        Payload::StatefulSet(sts) => sts.spec.as_ref().map(|s| &s.template),
        Payload::DaemonSet(ds) => ds.spec.as_ref().map(|s| &s.template),
        _ => None,
    };
    template
        .and_then(|t| t.spec.as_ref())
        .map(|s| s.containers.clone())
        .unwrap_or_default()
}

fn prepare_configmap(tree: &mut ComponentTree, id: ComponentId, cm: &mut ConfigMap) -> Result<()> {
    fill_metadata(tree, id, &mut cm.metadata, false);

    // Load `config.fromFile` once; a second prepare pass leaves it alone.
    if cm.binary_data.is_none() {
        let args = tree.node(id).effective_args.clone();
        if args.get("config.fromFile").is_some() {
            let mut data = BTreeMap::new();
            for token in args.get_string_list("config.fromFile") {
                let (key, path) = match token.split_once('=') {
                    Some((k, p)) => (k.to_string(), p.to_string()),
                    None => (file_key(&token), token.clone()),
                };
                let bytes = std::fs::read(&path)?;
                data.insert(key, ByteString(bytes));
            }
            if !data.is_empty() {
                cm.binary_data = Some(data);
            }
        }
    }
    Ok(())
}

fn file_key(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn prepare_namespace(tree: &mut ComponentTree, id: ComponentId, ns: &mut Namespace) -> Result<()> {
    if ns.metadata.name.is_none() {
        ns.metadata.name = Some(tree.node(id).name.clone());
    }
    let labels = tree.node(id).labels.clone();
    if !labels.is_empty() {
        let meta_labels = ns.metadata.labels.get_or_insert_with(BTreeMap::new);
        for (k, v) in labels {
            meta_labels.entry(k).or_insert(v);
        }
    }
    Ok(())
}

/// Add a `<name>-svc` Service child when `service.enabled` asks for one
fn inject_service_child(
    tree: &mut ComponentTree,
    id: ComponentId,
    args: &EffectiveArgs,
) -> Result<()> {
    let enabled = args.get_bool("service.enabled")?.unwrap_or(false);
    if !enabled || tree.has_kind_as_child(id, Kind::Service) {
        return Ok(());
    }

    debug!(component = %tree.log_name(id), "adding service");
    let mut svc_args = ArgMap::new();
    for key in ["service.nodePort", "service.type"] {
        if let Some(v) = args.get(key) {
            svc_args.insert(key.to_string(), v.to_string());
        }
    }

    let name = format!("{}-svc", tree.node(id).name);
    let labels = tree.node(id).labels.clone();
    tree.add_child(
        id,
        name,
        Kind::Service,
        labels,
        svc_args,
        Payload::default_for(Kind::Service),
    );
    Ok(())
}

/// Add a `<name>-conf` ConfigMap child for `config.fromFile` and mount it
/// read-only at `/config` in every container.
///
/// `pod` is the caller's checked-out pod spec; the workload payload is out
/// of the arena while it is being prepared, so it cannot be reached through
/// the tree here.
fn inject_configmap_volume(
    tree: &mut ComponentTree,
    id: ComponentId,
    args: &EffectiveArgs,
    config: &Config,
    pod: &mut PodSpec,
) -> Result<()> {
    if args.get("config.fromFile").is_none() || tree.has_kind_as_child(id, Kind::ConfigMap) {
        return Ok(());
    }

    debug!(component = %tree.log_name(id), "adding config map");
    let mut cm_args = ArgMap::new();
    if let Some(v) = args.get("config.fromFile") {
        cm_args.insert("config.fromFile".to_string(), v.to_string());
    }

    let name = format!("{}-conf", tree.node(id).name);
    let cm_id = tree.add_child(
        id,
        name.clone(),
        Kind::ConfigMap,
        ArgMap::new(),
        cm_args,
        Payload::default_for(Kind::ConfigMap),
    );
    // The volume needs the fully prepared config map.
    prepare_component(tree, cm_id, config)?;

    let (cm_name, keys) = match &tree.node(cm_id).payload {
        Payload::ConfigMap(cm) => (
            cm.metadata.name.clone().unwrap_or(name),
            cm.binary_data
                .as_ref()
                .map(|d| d.keys().cloned().collect::<Vec<_>>())
                .unwrap_or_default(),
        ),
        _ => (name, Vec::new()),
    };

    let volume = Volume {
        name: cm_name.clone(),
        config_map: Some(ConfigMapVolumeSource {
            name: cm_name.clone(),
            items: Some(
                keys.iter()
                    .map(|k| KeyToPath {
                        key: k.clone(),
                        path: k.clone(),
                        mode: Some(0o440),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    };
    pod.volumes.get_or_insert_with(Vec::new).push(volume);

    let mount = VolumeMount {
        name: cm_name,
        mount_path: "/config".to_string(),
        read_only: Some(true),
        ..Default::default()
    };
    for container in &mut pod.containers {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(mount.clone());
    }

    Ok(())
}
