//! Bounded fan-out of proxied sensor queries.
//!
//! One proxied GET per (pod, node) target, at most [`MAX_WORKERS`]
//! in flight. A single unresponsive pod must not block the scan:
//! per-pod failures are logged and the result is dropped, leaving a
//! partial envelope set for the collector to judge.

use futures::StreamExt;
use sensor_types::DataEnvelope;
use sensor_types::ResourceKind;
use tracing::warn;

use crate::cluster::ClusterGateway;

/// Upper bound on concurrent proxied requests per kind.
const MAX_WORKERS: usize = 10;

/// Query every target pod for one resource kind and drain the
/// responses into envelopes. Envelope order is unspecified.
pub(crate) async fn fan_out<G: ClusterGateway>(
    gateway: &G,
    namespace: &str,
    port: i32,
    targets: &[(String, String)],
    kind: ResourceKind,
) -> Vec<DataEnvelope> {
    if targets.is_empty() {
        return Vec::new();
    }
    let concurrency = targets.len().min(MAX_WORKERS);

    futures::stream::iter(targets.iter().cloned())
        .map(|(pod_name, node_name)| async move {
            match gateway.proxy_get(namespace, &pod_name, port, kind.path()).await {
                Ok(data) => Some(DataEnvelope::new(kind, node_name, data)),
                Err(error) => {
                    warn!(
                        pod = %pod_name,
                        path = kind.path(),
                        "dropping failed sensor query: {error:?}"
                    );
                    None
                }
            }
        })
        .buffer_unordered(concurrency)
        .filter_map(|envelope| async move { envelope })
        .collect()
        .await
}
