use crate::state::Workload;
use tokio::sync::mpsc;

/// Drains the conduit until every sender is gone, then orders the result.
///
/// `recv` only yields `None` once all senders have been dropped and the buffer is
/// empty, so the returned list holds everything any scanning task produced.
pub async fn collect(mut conduit: mpsc::Receiver<Workload>) -> Vec<Workload> {
    let mut workloads = Vec::new();
    while let Some(workload) = conduit.recv().await {
        workloads.push(workload);
    }
    sort_workloads(&mut workloads);
    workloads
}

/// Orders by namespace, then pod, then container, independent of arrival order.
pub fn sort_workloads(workloads: &mut [Workload]) {
    workloads.sort_by(|a, b| {
        (a.namespace(), a.pod(), a.container(), a.image()).cmp(&(
            b.namespace(),
            b.pod(),
            b.container(),
            b.image(),
        ))
    });
}
