//! Scan-scoped host-sensor facade.
//!
//! [`HostSensorHandler`] owns the deployed sensor fleet for the
//! lifetime of one scan: it rolls the daemonset out, keeps the pod
//! membership current in the background, answers collection requests
//! and removes the cluster-side state again on teardown.

use std::path::Path;
use std::sync::Arc;

use error_stack::Report;
use sensor_types::DataEnvelope;
use sensor_types::ResourceKind;
use sensor_types::ScanStatuses;
use sensor_types::VERSION_PATH;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster::ClusterGateway;
use crate::collector::ResourceCollector;
use crate::error::SensorError;
use crate::manifest::SensorManifest;
use crate::rollout;
use crate::rollout::DaemonState;
use crate::teardown;
use crate::tracker::PodMembership;

#[derive(Debug)]
pub struct HostSensorHandler<G: ClusterGateway> {
    gateway: Arc<G>,
    state: DaemonState,
    membership: PodMembership,
    cancellation_token: CancellationToken,
}

impl<G: ClusterGateway> HostSensorHandler<G> {
    /// Prepare the sensor fleet: parse the manifest, apply it, start
    /// the membership tracker and wait (bounded) for readiness.
    ///
    /// Fails only when the configuration is unusable (`Config`) or the
    /// cluster is (`FatalCluster`); a readiness deadline is degradation,
    /// not failure.
    pub async fn init(
        gateway: Option<Arc<G>>,
        manifest_override: Option<&Path>,
    ) -> Result<Self, Report<SensorError>> {
        let gateway = gateway.ok_or_else(|| {
            Report::new(SensorError::config("no cluster gateway provided"))
        })?;

        let manifest = SensorManifest::load(manifest_override)?;
        let (state, node_count) = rollout::deploy(gateway.as_ref(), &manifest).await?;

        let membership = PodMembership::new();
        let cancellation_token = CancellationToken::new();
        // Detached on purpose; the token is its only shutdown handle.
        let _tracker = membership.spawn_tracker(
            Arc::clone(&gateway),
            state.namespace.clone(),
            state.label_selector.clone(),
            cancellation_token.clone(),
        );

        rollout::await_readiness(&membership, node_count, &cancellation_token).await;

        Ok(Self {
            gateway,
            state,
            membership,
            cancellation_token,
        })
    }

    /// Namespace created for this scan. Useful for logging.
    pub fn namespace(&self) -> &str {
        &self.state.namespace
    }

    /// Run the ordered collection sequence over the current ready
    /// membership.
    ///
    /// Degradation is reported through the status map; the error
    /// branch is reserved for unrecoverable configuration faults and
    /// does not fire once `init` has succeeded.
    pub async fn collect_resources(
        &self,
    ) -> Result<(Vec<DataEnvelope>, ScanStatuses), Report<SensorError>> {
        info!(namespace = %self.state.namespace, "collecting host sensor data");
        let collector =
            ResourceCollector::new(self.gateway.as_ref(), &self.state, &self.membership);
        Ok(collector.collect().await)
    }

    /// Kubelet configuration files of every responsive node, already
    /// transcoded from YAML to JSON.
    pub async fn collect_kubelet_configurations(&self) -> Vec<DataEnvelope> {
        let collector =
            ResourceCollector::new(self.gateway.as_ref(), &self.state, &self.membership);
        let (envelopes, _attempted) = collector
            .collect_kind(ResourceKind::KubeletConfiguration)
            .await;
        envelopes
    }

    /// Kubelet command lines of every responsive node, wrapped into
    /// `{"fullCommand": ...}` objects.
    pub async fn collect_kubelet_command_line(&self) -> Vec<DataEnvelope> {
        let collector =
            ResourceCollector::new(self.gateway.as_ref(), &self.state, &self.membership);
        let (envelopes, _attempted) = collector
            .collect_kind(ResourceKind::KubeletCommandLine)
            .await;
        envelopes
    }

    /// Version reported by the sensor binary. Tries the ready pods in
    /// turn and aggregates every failure when none answers.
    pub async fn sensor_version(&self) -> Result<String, Report<SensorError>> {
        let targets = self.membership.ready_pods();
        if targets.is_empty() {
            return Err(Report::new(SensorError::VersionProbe {
                message: "no host-sensor pods available".to_string(),
            }));
        }

        let mut failures = Vec::with_capacity(targets.len());
        for (pod_name, _node_name) in &targets {
            match self
                .gateway
                .proxy_get(&self.state.namespace, pod_name, self.state.port, VERSION_PATH)
                .await
            {
                Ok(body) => {
                    let version = String::from_utf8_lossy(&body)
                        .trim()
                        .trim_matches('"')
                        .to_string();
                    return Ok(version);
                }
                Err(error) => failures.push(format!("{pod_name}: {error}")),
            }
        }
        Err(Report::new(SensorError::VersionProbe {
            message: failures.join("; "),
        }))
    }

    /// Remove the scan's cluster-side state: daemonset first, then the
    /// namespace. Safe to call repeatedly; both deletes treat missing
    /// resources as success. Also stops the membership tracker.
    pub async fn tear_down(&self) -> Result<(), Report<SensorError>> {
        self.cancellation_token.cancel();
        teardown::run(self.gateway.as_ref(), &self.state)
            .await
            .map_err(|error| {
                error.change_context(SensorError::Rollout {
                    message: "failed to tear down sensor fleet".to_string(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use sensor_types::COLLECTION_SEQUENCE;
    use similar_asserts::assert_eq;

    use crate::test_support::MockGateway;

    use super::*;

    async fn init(gateway: Arc<MockGateway>) -> HostSensorHandler<MockGateway> {
        HostSensorHandler::init(Some(gateway), None).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn two_nodes_with_cloud_provider_skip_control_plane() {
        let gateway = Arc::new(MockGateway::two_ready_nodes());
        gateway.set_response("/cloudProviderInfo", br#"{"providerID":"foo"}"#);

        let handler = init(Arc::clone(&gateway)).await;
        assert_eq!(handler.namespace(), "host-sensor");

        let (envelopes, statuses) = handler.collect_resources().await.unwrap();
        // 9 kinds x 2 nodes; the control plane probe is suppressed.
        assert_eq!(envelopes.len(), 18);
        assert!(envelopes.iter().all(|e| e.kind != "ControlPlaneInfo"));
        assert!(statuses.is_empty());

        for envelope in &envelopes {
            assert!(envelope.name == "node1" || envelope.name == "node2");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_nodes_without_cloud_provider_include_control_plane() {
        let gateway = Arc::new(MockGateway::two_ready_nodes());
        gateway.set_response("/cloudProviderInfo", b"{}\n");

        let handler = init(gateway).await;
        let (envelopes, statuses) = handler.collect_resources().await.unwrap();

        assert_eq!(envelopes.len(), 20);
        assert_eq!(
            envelopes
                .iter()
                .filter(|e| e.kind == "ControlPlaneInfo")
                .count(),
            2
        );
        assert!(statuses.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn version_probe_failure_aggregates_pod_errors() {
        let gateway = Arc::new(MockGateway::two_ready_nodes());
        gateway.fail_path(VERSION_PATH);

        let handler = init(Arc::clone(&gateway)).await;

        let error = handler.sensor_version().await.unwrap_err();
        assert!(format!("{error}").contains("mock"));

        // The failed probe must not degrade the scan itself.
        let (envelopes, _statuses) = handler.collect_resources().await.unwrap();
        assert!(!envelopes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn version_probe_returns_first_successful_payload() {
        let gateway = Arc::new(MockGateway::two_ready_nodes());
        gateway.set_response(VERSION_PATH, b"\"v0.2.0\"\n");

        let handler = init(gateway).await;
        assert_eq!(handler.sensor_version().await.unwrap(), "v0.2.0");
    }

    #[tokio::test]
    async fn zero_nodes_fail_init() {
        let gateway = Arc::new(MockGateway::default());
        let error = HostSensorHandler::init(Some(gateway), None)
            .await
            .unwrap_err();
        assert!(format!("{error}").contains("no nodes to scan"));
    }

    #[tokio::test]
    async fn missing_gateway_fails_init_without_touching_the_cluster() {
        let error = HostSensorHandler::<MockGateway>::init(None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            error.current_context(),
            SensorError::Config { .. }
        ));
    }

    #[tokio::test]
    async fn invalid_manifest_override_fails_before_any_apply() {
        let gateway = Arc::new(MockGateway::two_ready_nodes());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\tx: 1").unwrap();

        let error = HostSensorHandler::init(Some(Arc::clone(&gateway)), Some(file.path()))
            .await
            .unwrap_err();
        assert!(matches!(
            error.current_context(),
            SensorError::Config { .. }
        ));
        assert!(gateway.applied_objects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn denied_watch_degrades_to_full_skip() {
        let gateway = Arc::new(MockGateway {
            nodes: vec!["node1".to_string()],
            deny_watch: true,
            ..MockGateway::default()
        });

        // Init succeeds; the readiness deadline elapses with empty maps.
        let handler = init(gateway).await;

        let (envelopes, statuses) = handler.collect_resources().await.unwrap();
        assert!(envelopes.is_empty());
        assert_eq!(statuses.len(), COLLECTION_SEQUENCE.len());
        for kind in COLLECTION_SEQUENCE {
            assert_eq!(
                statuses.get(kind).unwrap().info,
                "no host-sensor pods available"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tear_down_is_idempotent() {
        let gateway = Arc::new(MockGateway::two_ready_nodes());
        let handler = init(Arc::clone(&gateway)).await;

        handler.tear_down().await.unwrap();
        handler.tear_down().await.unwrap();

        let deleted = gateway.deleted_objects();
        assert_eq!(deleted[0], "DaemonSet/host-sensor");
        assert_eq!(deleted[1], "Namespace/host-sensor");
    }

    #[tokio::test]
    async fn failed_apply_triggers_teardown_and_surfaces_rollout_error() {
        let gateway = Arc::new(MockGateway {
            nodes: vec!["node1".to_string()],
            fail_daemon_set_apply: true,
            ..MockGateway::default()
        });

        let error = HostSensorHandler::init(Some(Arc::clone(&gateway)), None)
            .await
            .unwrap_err();
        assert!(matches!(
            error.current_context(),
            SensorError::Rollout { .. }
        ));
        assert!(gateway
            .deleted_objects()
            .contains(&"Namespace/host-sensor".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn applying_the_manifest_twice_is_idempotent() {
        let gateway = Arc::new(MockGateway::two_ready_nodes());
        let first = init(Arc::clone(&gateway)).await;
        let second = init(Arc::clone(&gateway)).await;

        assert_eq!(first.namespace(), second.namespace());
        // Namespace, ServiceAccount and DaemonSet, applied twice over.
        assert_eq!(gateway.applied_objects().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn kubelet_configurations_are_transcoded() {
        let gateway = Arc::new(MockGateway::two_ready_nodes());
        gateway.set_response("/kubeletConfigurations", b"port: 10250\n");

        let handler = init(gateway).await;
        let envelopes = handler.collect_kubelet_configurations().await;
        assert_eq!(envelopes.len(), 2);
        for envelope in &envelopes {
            let value: serde_json::Value = serde_json::from_slice(&envelope.data).unwrap();
            assert_eq!(value["port"], 10250);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn kubelet_command_line_is_wrapped() {
        let gateway = Arc::new(MockGateway::two_ready_nodes());
        gateway.set_response("/kubeletCommandLine", b"/usr/bin/kubelet --v=2");

        let handler = init(gateway).await;
        let envelopes = handler.collect_kubelet_command_line().await;
        assert_eq!(envelopes.len(), 2);
        for envelope in &envelopes {
            let value: serde_json::Value = serde_json::from_slice(&envelope.data).unwrap();
            assert_eq!(value["fullCommand"], "/usr/bin/kubelet --v=2");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn partial_fleet_reports_skipped_kind_when_no_pod_responds() {
        let gateway = Arc::new(MockGateway::two_ready_nodes());
        gateway.fail_path(ResourceKind::CNIInfo.path());

        let handler = init(gateway).await;
        let (envelopes, statuses) = handler.collect_resources().await.unwrap();

        assert!(envelopes.iter().all(|e| e.kind != "CNIInfo"));
        assert_eq!(
            statuses.get(ResourceKind::CNIInfo).unwrap().info,
            "no pods responded"
        );
        // Every other kind either produced envelopes or a status entry,
        // never both.
        for kind in COLLECTION_SEQUENCE {
            let has_envelopes = envelopes.iter().any(|e| e.kind == kind.kind());
            let has_status = statuses.get(kind).is_some();
            if kind == ResourceKind::ControlPlaneInfo {
                // Suppressed by the default (non-empty) cloud payload.
                assert!(!has_envelopes && !has_status);
                continue;
            }
            assert!(has_envelopes ^ has_status);
        }
    }
}
