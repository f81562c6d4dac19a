use crate::cluster::ClusterClient;
use crate::config::NamespaceFilter;
use crate::error::{ClusterQueryError, ScanError};
use crate::image_reference::is_unpinned;
use crate::state::Workload;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Lists the namespaces to scan. Failure here is fatal for the whole scan.
pub async fn list_namespaces<C: ClusterClient>(
    client: &C,
    filter: &NamespaceFilter,
) -> Result<Vec<String>, ClusterQueryError> {
    let all = client.list_namespaces().await?;
    let total = all.len();

    let namespaces: Vec<String> = all
        .into_iter()
        .filter(|namespace| {
            let allowed = filter.allows(namespace);
            if allowed {
                debug!("Adding namespace {}", namespace);
            } else {
                debug!("Skipping excluded namespace {}", namespace);
            }
            allowed
        })
        .collect();

    info!(
        "Found {} namespaces, {} excluded",
        total,
        total - namespaces.len()
    );
    Ok(namespaces)
}

/// Scans the pods of one namespace and sends every container with an unpinned image to `sink`.
///
/// Returns the number of flagged containers.
pub async fn scan_namespace<C: ClusterClient>(
    namespace: &str,
    client: &C,
    sink: &mpsc::Sender<Workload>,
    include_init_containers: bool,
) -> Result<usize, ScanError> {
    debug!("Getting pods in namespace {}", namespace);
    let pods = client.list_pods(namespace).await?;

    let mut flagged = 0;
    for pod in &pods {
        debug!("Getting pod {}", pod.name);
        for container in pod.containers(include_init_containers) {
            if !is_unpinned(&container.image) {
                continue;
            }
            debug!(
                "Container {} in pod {} uses unpinned image {}",
                container.name, pod.name, container.image
            );
            sink.send(Workload::new(namespace, &pod.name, container))
                .await
                .map_err(|_| ScanError::Aborted {
                    namespace: namespace.to_string(),
                    message: "result conduit closed".to_string(),
                })?;
            flagged += 1;
        }
    }

    info!(
        "Scanned {} pods in namespace {}, {} unpinned containers",
        pods.len(),
        namespace,
        flagged
    );
    Ok(flagged)
}
