//! Sensor fleet rollout.
//!
//! Turns the parsed manifest into running sensor pods on every
//! schedulable node, or fails fast when the environment itself is
//! unusable. Readiness is a best-effort quorum: once the deadline
//! expires the scan proceeds with whatever came up, and the collector
//! accounts for missing nodes through the status map.

use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::cluster::ClusterGateway;
use crate::error::SensorError;
use crate::manifest::ManifestObject;
use crate::manifest::SensorManifest;
use crate::teardown;
use crate::tracker::PodMembership;

/// Interval between readiness checks.
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Hard readiness deadline. Elapsing it degrades the scan instead of
/// aborting it.
const READINESS_DEADLINE: Duration = Duration::from_secs(100);

/// Grace period passed to the teardown deletes.
const TEARDOWN_GRACE_PERIOD_SECONDS: u32 = 0;

/// Scan-scoped identity of the deployed sensor fleet. Write-once after
/// rollout; readers need no lock.
#[derive(Debug, Clone)]
pub(crate) struct DaemonState {
    pub namespace: String,
    pub daemon_set_name: String,
    pub port: i32,
    pub grace_period_seconds: u32,
    pub label_selector: String,
}

/// Apply the manifest and return the daemon state plus the node count
/// the readiness poll has to reach.
///
/// Every non-Namespace object is applied into the manifest's namespace
/// regardless of what its document says. A mid-apply failure tears the
/// namespace down again before surfacing the original error.
pub(crate) async fn deploy<G: ClusterGateway>(
    gateway: &G,
    manifest: &SensorManifest,
) -> Result<(DaemonState, usize), Report<SensorError>> {
    let nodes = gateway
        .list_node_names()
        .await
        .change_context(SensorError::FatalCluster {
            message: "cluster node list is unreachable".to_string(),
        })?;
    if nodes.is_empty() {
        return Err(Report::new(SensorError::FatalCluster {
            message: "no nodes to scan".to_string(),
        }));
    }

    let state = DaemonState {
        namespace: manifest.namespace.clone(),
        daemon_set_name: manifest.daemon_set_name.clone(),
        port: manifest.port,
        grace_period_seconds: TEARDOWN_GRACE_PERIOD_SECONDS,
        label_selector: manifest.label_selector.clone(),
    };

    if let Err(error) = apply_objects(gateway, manifest).await {
        warn!("sensor rollout failed, tearing down namespace '{}'", state.namespace);
        if let Err(teardown_error) = teardown::run(gateway, &state).await {
            warn!("teardown after failed rollout also failed: {teardown_error:?}");
        }
        return Err(error.change_context(SensorError::Rollout {
            message: "failed to apply sensor workload objects".to_string(),
        }));
    }

    info!(
        namespace = %state.namespace,
        daemon_set = %state.daemon_set_name,
        nodes = nodes.len(),
        "sensor daemonset applied"
    );
    Ok((state, nodes.len()))
}

async fn apply_objects<G: ClusterGateway>(
    gateway: &G,
    manifest: &SensorManifest,
) -> Result<(), Report<crate::cluster::ClusterError>> {
    for object in &manifest.objects {
        match object {
            ManifestObject::Namespace(namespace) => {
                gateway.apply_namespace(namespace).await?;
            }
            ManifestObject::DaemonSet(daemon_set) => {
                let mut daemon_set = daemon_set.as_ref().clone();
                daemon_set.metadata.namespace = Some(manifest.namespace.clone());
                gateway
                    .apply_daemon_set(&manifest.namespace, &daemon_set)
                    .await?;
            }
            ManifestObject::Other(dynamic) => {
                let mut dynamic = dynamic.as_ref().clone();
                dynamic.metadata.namespace = Some(manifest.namespace.clone());
                gateway.apply_dynamic(&manifest.namespace, &dynamic).await?;
            }
        }
    }
    Ok(())
}

/// Block until every node is accounted for (ready or unschedulable),
/// the deadline expires, or the scan is cancelled. Never fails: the
/// deadline path logs a warning and proceeds with what is ready.
pub(crate) async fn await_readiness(
    membership: &PodMembership,
    node_count: usize,
    cancellation_token: &CancellationToken,
) {
    let deadline = tokio::time::Instant::now() + READINESS_DEADLINE;

    loop {
        let (ready, unschedulable) = membership.counts();
        if ready + unschedulable >= node_count {
            info!(ready, unschedulable, node_count, "sensor fleet is ready");
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                ready,
                unschedulable,
                node_count,
                "sensor readiness deadline expired, proceeding with partial fleet"
            );
            return;
        }
        select! {
            _ = cancellation_token.cancelled() => {
                warn!("sensor readiness wait cancelled");
                return;
            }
            _ = tokio::time::sleep(READINESS_POLL_INTERVAL) => {}
        }
    }
}
