//! Removal of scan-scoped cluster state.
//!
//! Deletes the daemonset and then its namespace with the configured
//! grace period. Both deletes treat "not found" as success, so the
//! sequence is idempotent and safe to invoke on every exit path,
//! including cancellation and mid-rollout failure. Termination is not
//! awaited; the cluster finishes the cleanup on its own.

use error_stack::Report;
use tracing::info;
use tracing::warn;

use crate::cluster::ClusterError;
use crate::cluster::ClusterGateway;
use crate::rollout::DaemonState;

pub(crate) async fn run<G: ClusterGateway>(
    gateway: &G,
    state: &DaemonState,
) -> Result<(), Report<ClusterError>> {
    if let Err(error) = gateway
        .delete_daemon_set(
            &state.namespace,
            &state.daemon_set_name,
            state.grace_period_seconds,
        )
        .await
    {
        warn!("failed to delete sensor daemonset: {error:?}");
        return Err(error);
    }

    if let Err(error) = gateway
        .delete_namespace(&state.namespace, state.grace_period_seconds)
        .await
    {
        warn!("failed to delete sensor namespace: {error:?}");
        return Err(error);
    }

    info!(namespace = %state.namespace, "sensor fleet torn down");
    Ok(())
}
