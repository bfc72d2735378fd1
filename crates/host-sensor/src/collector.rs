//! Ordered host-data collection.
//!
//! Drives the fixed kind sequence over the current ready membership
//! and reconciles the results into the `(envelopes, statuses)` pair.
//! The collector never aborts: kinds that produced nothing get a
//! Skipped status entry and the scan carries on.

use sensor_types::DataEnvelope;
use sensor_types::ResourceKind;
use sensor_types::ScanStatuses;
use sensor_types::COLLECTION_SEQUENCE;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::cluster::ClusterGateway;
use crate::pool;
use crate::rollout::DaemonState;
use crate::tracker::PodMembership;

pub(crate) struct ResourceCollector<'a, G> {
    gateway: &'a G,
    state: &'a DaemonState,
    membership: &'a PodMembership,
}

impl<'a, G: ClusterGateway> ResourceCollector<'a, G> {
    pub(crate) fn new(gateway: &'a G, state: &'a DaemonState, membership: &'a PodMembership) -> Self {
        Self {
            gateway,
            state,
            membership,
        }
    }

    /// Run the full ordered sequence.
    ///
    /// CloudProviderInfo is inspected as soon as it is collected; a
    /// non-empty payload on any node marks the cluster as managed and
    /// suppresses the ControlPlaneInfo probe entirely (the control
    /// plane of a managed cluster is not reachable from node-local
    /// sensors).
    pub(crate) async fn collect(&self) -> (Vec<DataEnvelope>, ScanStatuses) {
        let mut envelopes = Vec::new();
        let mut statuses = ScanStatuses::new();
        let mut has_cloud_provider = false;

        for kind in COLLECTION_SEQUENCE {
            if kind == ResourceKind::ControlPlaneInfo && has_cloud_provider {
                debug!("cloud provider detected, skipping control plane probe");
                continue;
            }

            let (collected, attempted) = self.collect_kind(kind).await;

            if kind == ResourceKind::CloudProviderInfo {
                has_cloud_provider = collected
                    .iter()
                    .any(|envelope| indicates_cloud_provider(&envelope.data));
            }

            if !collected.is_empty() {
                envelopes.extend(collected);
            } else if attempted > 0 {
                statuses.mark_skipped(kind, "no pods responded");
            } else {
                statuses.mark_skipped(kind, "no host-sensor pods available");
            }
        }

        info!(
            envelopes = envelopes.len(),
            skipped = statuses.len(),
            "host data collection finished"
        );
        (envelopes, statuses)
    }

    /// Query one kind across the current ready membership. Returns the
    /// transformed envelopes and how many pods were attempted.
    pub(crate) async fn collect_kind(&self, kind: ResourceKind) -> (Vec<DataEnvelope>, usize) {
        let targets = self.membership.ready_pods();
        let attempted = targets.len();
        let mut envelopes = pool::fan_out(
            self.gateway,
            &self.state.namespace,
            self.state.port,
            &targets,
            kind,
        )
        .await;
        apply_transform(kind, &mut envelopes);
        (envelopes, attempted)
    }
}

/// Whether a cloud-provider payload signals a managed cluster. The
/// sensor reports `{}` (possibly with trailing whitespace) when no
/// provider is detected.
fn indicates_cloud_provider(payload: &[u8]) -> bool {
    let text = String::from_utf8_lossy(payload);
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed != "{}"
}

/// Per-kind payload transforms, applied before envelopes are emitted.
pub(crate) fn apply_transform(kind: ResourceKind, envelopes: &mut Vec<DataEnvelope>) {
    match kind {
        // The sensor returns the kubelet configuration as YAML; the
        // evaluator downstream expects JSON. A payload that fails to
        // transcode drops only its own envelope.
        ResourceKind::KubeletConfiguration => {
            envelopes.retain_mut(|envelope| {
                match serde_yaml::from_slice::<serde_json::Value>(&envelope.data)
                    .map_err(|error| error.to_string())
                    .and_then(|value| {
                        serde_json::to_vec(&value).map_err(|error| error.to_string())
                    }) {
                    Ok(json) => {
                        envelope.data = json;
                        true
                    }
                    Err(error) => {
                        warn!(
                            node = %envelope.name,
                            "dropping kubelet configuration with malformed YAML: {error}"
                        );
                        false
                    }
                }
            });
        }
        ResourceKind::KubeletCommandLine => {
            for envelope in envelopes {
                let wrapped = serde_json::json!({
                    "fullCommand": String::from_utf8_lossy(&envelope.data),
                });
                if let Ok(data) = serde_json::to_vec(&wrapped) {
                    envelope.data = data;
                }
            }
        }
        _ => {}
    }
}
