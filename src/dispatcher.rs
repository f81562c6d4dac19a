use crate::cluster::ClusterClient;
use crate::collector;
use crate::config::{BufferSetting, DEFAULT_BUFFER_CAPACITY, NamespaceFilter, Settings};
use crate::error::{ClusterQueryError, QueryPhase, ScanError};
use crate::scanner::{list_namespaces, scan_namespace};
use crate::state::Workload;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Maximum number of namespaces scanned at the same time.
    pub concurrency: usize,
    /// Capacity of the result conduit.
    pub capacity: usize,
    pub deadline: Option<Instant>,
    pub include_init_containers: bool,
}

/// Outcome of a scan: flagged workloads in a stable order, plus per-namespace failures.
#[derive(Debug)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub workloads: Vec<Workload>,
    pub errors: Vec<ScanError>,
    /// Namespaces whose scan completed successfully.
    pub namespaces_scanned: usize,
}

impl ScanReport {
    pub fn namespaces_failed(&self) -> usize {
        self.errors.len()
    }

    /// False when a timeout or cancellation cut namespace scans short.
    pub fn is_complete(&self) -> bool {
        !self.errors.iter().any(ScanError::is_cancelled)
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Full scan: enumerate namespaces, size the conduit, then fan out.
///
/// Only a failed or interrupted namespace listing is returned as an error.
pub async fn scan_cluster<C: ClusterClient>(
    client: Arc<C>,
    settings: &Settings,
    filter: &NamespaceFilter,
    cancel: CancellationToken,
) -> Result<ScanReport, ClusterQueryError> {
    let deadline = settings.deadline(Instant::now());

    let namespaces = within(deadline, &cancel, list_namespaces(client.as_ref(), filter))
        .await
        .ok_or_else(|| {
            ClusterQueryError::new(
                QueryPhase::ListNamespaces,
                "interrupted before namespaces were listed",
            )
        })??;

    let capacity = conduit_capacity(
        client.as_ref(),
        settings.buffer,
        settings.include_init_containers,
        deadline,
        &cancel,
    )
    .await;

    let options = ScanOptions {
        concurrency: settings.concurrency,
        capacity,
        deadline,
        include_init_containers: settings.include_init_containers,
    };
    Ok(run_scan(client, namespaces, &options, cancel).await)
}

/// Capacity of the result conduit for the configured buffer setting.
///
/// `Auto` counts every container in the cluster; if the count fails the fixed default is used.
pub async fn conduit_capacity<C: ClusterClient>(
    client: &C,
    setting: BufferSetting,
    include_init_containers: bool,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> usize {
    match setting {
        BufferSetting::Fixed(capacity) => capacity,
        BufferSetting::Auto => {
            match within(deadline, cancel, client.count_containers(include_init_containers)).await
            {
                Some(Ok(total)) => {
                    let capacity = estimate_capacity(total);
                    info!(
                        "Counted {} containers, using buffer capacity {}",
                        total, capacity
                    );
                    capacity
                }
                Some(Err(e)) => {
                    warn!(
                        "Falling back to buffer capacity {}: {}",
                        DEFAULT_BUFFER_CAPACITY, e
                    );
                    DEFAULT_BUFFER_CAPACITY
                }
                None => DEFAULT_BUFFER_CAPACITY,
            }
        }
    }
}

/// Upper bound on matching containers plus 10% headroom for pods created meanwhile.
pub fn estimate_capacity(total_containers: usize) -> usize {
    total_containers
        .saturating_add(total_containers.div_ceil(10))
        .clamp(1, Semaphore::MAX_PERMITS)
}

/// Scans every namespace concurrently and collects the flagged workloads.
///
/// Each task owns a clone of the conduit's sender and drops it when it finishes, so the
/// conduit closes exactly when the last task is done and can never be closed under a
/// writer. The collector drains while tasks run, which keeps a full conduit from
/// stalling the barrier, and sorts only after the conduit has closed.
pub async fn run_scan<C: ClusterClient>(
    client: Arc<C>,
    namespaces: Vec<String>,
    options: &ScanOptions,
    cancel: CancellationToken,
) -> ScanReport {
    let started_at = Utc::now();
    let scan_token = cancel.child_token();
    let watchdog = options
        .deadline
        .map(|deadline| spawn_watchdog(deadline, scan_token.clone()));

    // Both primitives panic above MAX_PERMITS.
    let concurrency = options.concurrency.clamp(1, Semaphore::MAX_PERMITS);
    let capacity = options.capacity.clamp(1, Semaphore::MAX_PERMITS);
    let permits = Arc::new(Semaphore::new(concurrency));
    let (tx, rx) = mpsc::channel(capacity);

    info!(
        "Scanning {} namespaces, at most {} at a time, buffer capacity {}",
        namespaces.len(),
        concurrency,
        capacity
    );

    let handles: Vec<(String, JoinHandle<Result<usize, ScanError>>)> = namespaces
        .into_iter()
        .map(|namespace| {
            let task = ScanTask {
                namespace: namespace.clone(),
                client: client.clone(),
                sink: tx.clone(),
                permits: permits.clone(),
                token: scan_token.clone(),
                include_init_containers: options.include_init_containers,
            };
            (namespace, tokio::spawn(task.run()))
        })
        .collect();
    drop(tx);

    let barrier = join_all(
        handles
            .into_iter()
            .map(|(namespace, handle)| async move { (namespace, handle.await) }),
    );
    let (outcomes, workloads) = tokio::join!(barrier, collector::collect(rx));

    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    let mut errors = Vec::new();
    let mut namespaces_scanned = 0;
    for (namespace, outcome) in outcomes {
        match outcome {
            Ok(Ok(flagged)) => {
                debug!("Namespace {} done, {} flagged", namespace, flagged);
                namespaces_scanned += 1;
            }
            Ok(Err(e)) => {
                warn!("Scan of namespace {} failed: {}", namespace, e);
                errors.push(e);
            }
            Err(join_error) => {
                warn!("Scan task for namespace {} died: {}", namespace, join_error);
                errors.push(ScanError::Aborted {
                    namespace,
                    message: join_error.to_string(),
                });
            }
        }
    }
    errors.sort_by(|a, b| a.namespace().cmp(&b.namespace()));

    info!(
        "Scan finished: {} namespaces scanned, {} failed, {} unpinned containers",
        namespaces_scanned,
        errors.len(),
        workloads.len()
    );

    ScanReport {
        started_at,
        workloads,
        errors,
        namespaces_scanned,
    }
}

struct ScanTask<C> {
    namespace: String,
    client: Arc<C>,
    sink: mpsc::Sender<Workload>,
    permits: Arc<Semaphore>,
    token: CancellationToken,
    include_init_containers: bool,
}

impl<C: ClusterClient> ScanTask<C> {
    async fn run(self) -> Result<usize, ScanError> {
        let scan = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| ScanError::Aborted {
                    namespace: self.namespace.clone(),
                    message: e.to_string(),
                })?;
            scan_namespace(
                &self.namespace,
                self.client.as_ref(),
                &self.sink,
                self.include_init_containers,
            )
            .await
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ScanError::Cancelled {
                namespace: self.namespace.clone(),
            }),
            result = scan => result,
        }
    }
}

fn spawn_watchdog(deadline: Instant, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Scan deadline reached, cancelling in-flight namespace scans");
                token.cancel();
            }
        }
    })
}

/// Runs `fut` unless the deadline passes or the scan is cancelled first.
async fn within<F: Future>(
    deadline: Option<Instant>,
    cancel: &CancellationToken,
    fut: F,
) -> Option<F::Output> {
    let bounded = async {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
            None => Some(fut.await),
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = bounded => output,
    }
}
