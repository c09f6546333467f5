//! Kube-backed implementation of the cluster API contract

use async_trait::async_trait;
use caravel_core::Kind;
use http::header::{HeaderName, HeaderValue};
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::config::{Kubeconfig, KubeConfigOptions};
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Client, Config};
use serde_json::Value;
use tracing::debug;

use crate::api::{DeleteOutcome, ObjectState, ResourceApi};
use crate::error::{KubeError, Result};
use crate::probe::classify;

/// Client identification header attached to every request
const CLIENT_HEADER: (&str, &str) = ("x-client", "caravel");

/// A cluster connection built from one kubeconfig
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
}

impl ClusterClient {
    /// Connect using an explicit kubeconfig file and optional context
    pub async fn from_kubeconfig(path: &str, context: Option<&str>) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path)?;
        let options = KubeConfigOptions {
            context: context.map(String::from),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
        Self::from_config(config)
    }

    /// Connect using the ambient environment ($KUBECONFIG or in-cluster)
    pub async fn infer() -> Result<Self> {
        Self::from_config(Config::infer().await?)
    }

    fn from_config(mut config: Config) -> Result<Self> {
        config.headers.push((
            HeaderName::from_static(CLIENT_HEADER.0),
            HeaderValue::from_static(CLIENT_HEADER.1),
        ));
        Ok(Self {
            client: Client::try_from(config)?,
        })
    }

    pub fn kube_client(&self) -> Client {
        self.client.clone()
    }
}

/// [`ResourceApi`] over a live cluster
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    pub fn new(client: &ClusterClient) -> Self {
        Self {
            client: client.kube_client(),
        }
    }

    /// Address a kind's collection without a discovery round-trip; the kind
    /// set is closed so group/version/plural are known statically.
    fn api_for(&self, kind: Kind, namespace: &str) -> Result<Api<DynamicObject>> {
        let loc = kind
            .api_location()
            .ok_or_else(|| KubeError::NoApiCollection(kind.to_string()))?;
        let gvk = GroupVersionKind::gvk(loc.group, loc.version, kind.as_str());
        let resource = ApiResource::from_gvk_with_plural(&gvk, loc.plural);

        let api = if kind.is_cluster_scoped() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        };
        Ok(api)
    }
}

#[async_trait]
impl ResourceApi for KubeApi {
    async fn create(&self, kind: Kind, namespace: &str, body: Value) -> Result<()> {
        let obj: DynamicObject = serde_json::from_value(body)?;
        let name = obj.metadata.name.as_deref().unwrap_or("unnamed").to_string();
        debug!(%kind, namespace, %name, "posting resource");

        let api = self.api_for(kind, namespace)?;
        api.create(&PostParams::default(), &obj).await?;
        Ok(())
    }

    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        debug!(%kind, namespace, name, "deleting resource");
        let api = self.api_for(kind, namespace)?;
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(DeleteOutcome::Gone),
            Err(e) => Err(e.into()),
        }
    }

    async fn probe(&self, kind: Kind, namespace: &str, name: &str) -> Result<ObjectState> {
        let api = self.api_for(kind, namespace)?;
        let obj = api.get_opt(name).await?;
        Ok(classify(kind, obj.as_ref()))
    }
}
