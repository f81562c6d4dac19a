use crate::error::{ClusterQueryError, ConfigError, QueryPhase};
use crate::state::{ContainerRecord, PodRecord};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use k8s_openapi::api::core::v1::{Container, Namespace, Pod};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Read-only view of the cluster used by the scan engine.
///
/// Implementations are shared between all scanning tasks, so every query must be
/// safe to issue concurrently.
pub trait ClusterClient: Send + Sync + 'static {
    fn list_namespaces(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, ClusterQueryError>> + Send;

    fn list_pods(
        &self,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<PodRecord>, ClusterQueryError>> + Send;

    /// Total number of containers across all pods of the cluster.
    fn count_containers(
        &self,
        include_init: bool,
    ) -> impl Future<Output = Result<usize, ClusterQueryError>> + Send;
}

pub async fn create_client(
    kubeconfig: &Path,
    context: Option<&str>,
) -> Result<Client, ConfigError> {
    info!("Loading kubeconfig from file {}", kubeconfig.display());
    if !kubeconfig.is_file() {
        return Err(ConfigError::KubeconfigMissing(kubeconfig.to_path_buf()));
    }

    let to_config_error = |source| ConfigError::Kubeconfig {
        path: kubeconfig.to_path_buf(),
        source,
    };
    let raw = Kubeconfig::read_from(kubeconfig).map_err(to_config_error)?;
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    let config = Config::from_custom_kubeconfig(raw, &options)
        .await
        .map_err(to_config_error)?;

    info!(
        "Using Kubernetes API server {} (context {})",
        config.cluster_url,
        context.unwrap_or("<current>")
    );
    Client::try_from(config).map_err(ConfigError::Client)
}

/// Token bucket shared by every API request: refills `qps` per second and holds up to `burst`.
pub fn request_limiter(qps: u32, burst: u32) -> Result<DefaultDirectRateLimiter, ConfigError> {
    let (Some(qps), Some(burst)) = (NonZeroU32::new(qps), NonZeroU32::new(burst)) else {
        return Err(ConfigError::Invalid(
            "qps and burst must be at least 1".to_string(),
        ));
    };
    Ok(RateLimiter::direct(Quota::per_second(qps).allow_burst(burst)))
}

/// [`ClusterClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    page_size: u32,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl KubeClusterClient {
    pub fn new(client: Client, page_size: u32, limiter: DefaultDirectRateLimiter) -> Self {
        Self {
            client,
            page_size,
            limiter: Arc::new(limiter),
        }
    }
}

impl ClusterClient for KubeClusterClient {
    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterQueryError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = list_all(&api, self.page_size, &self.limiter)
            .await
            .map_err(|e| ClusterQueryError::new(QueryPhase::ListNamespaces, e))?;
        Ok(namespaces.iter().map(|ns| ns.name_any()).collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>, ClusterQueryError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = list_all(&api, self.page_size, &self.limiter).await.map_err(|e| {
            ClusterQueryError::new(QueryPhase::ListPods, e).in_namespace(namespace)
        })?;
        Ok(pods.into_iter().map(pod_record).collect())
    }

    async fn count_containers(&self, include_init: bool) -> Result<usize, ClusterQueryError> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let pods = list_all(&api, self.page_size, &self.limiter)
            .await
            .map_err(|e| ClusterQueryError::new(QueryPhase::CountContainers, e))?;
        Ok(pods
            .into_iter()
            .map(|pod| pod_record(pod).container_count(include_init))
            .sum())
    }
}

/// Lists every object of a kind, following continue tokens until the server has no more pages.
///
/// Each page request waits for a token from `limiter` first.
async fn list_all<K>(
    api: &Api<K>,
    page_size: u32,
    limiter: &DefaultDirectRateLimiter,
) -> Result<Vec<K>, kube::Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    let mut items = Vec::new();
    let mut lp = ListParams::default().limit(page_size);
    loop {
        limiter.until_ready().await;
        let page = api.list(&lp).await?;
        let next = page.metadata.continue_.clone();
        items.extend(page.items);
        match next {
            Some(token) if !token.is_empty() => {
                debug!("Fetching next page, {} items so far", items.len());
                lp = lp.continue_token(&token);
            }
            _ => break,
        }
    }
    Ok(items)
}

fn pod_record(pod: Pod) -> PodRecord {
    let name = pod.name_any();
    let spec = pod.spec.unwrap_or_default();
    let init_containers = spec.init_containers.unwrap_or_default();
    PodRecord::new(name, spec.containers.into_iter().map(container_record).collect())
        .with_init_containers(init_containers.into_iter().map(container_record).collect())
}

fn container_record(container: Container) -> ContainerRecord {
    ContainerRecord::new(container.name, container.image.unwrap_or_default())
}
