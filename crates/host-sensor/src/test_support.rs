//! In-memory cluster gateway for tests.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Namespace;
use kube::core::DynamicObject;

use crate::cluster::ClusterError;
use crate::cluster::ClusterGateway;
use crate::cluster::PodEventStream;
use crate::cluster::PodPhase;
use crate::cluster::PodSnapshot;
use crate::cluster::PodWatchEvent;

/// Scriptable gateway: fixed node set, a replayed watch event list,
/// and per-path proxy responses. Every failure message contains the
/// string `mock` so aggregated errors are attributable in assertions.
#[derive(Debug)]
pub(crate) struct MockGateway {
    pub nodes: Vec<String>,
    pub pods: Vec<PodSnapshot>,
    pub responses: Mutex<HashMap<String, Vec<u8>>>,
    pub failing_paths: Mutex<HashSet<String>>,
    pub default_response: Vec<u8>,
    pub deny_watch: bool,
    pub fail_daemon_set_apply: bool,
    pub applied: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            pods: Vec::new(),
            responses: Mutex::new(HashMap::new()),
            failing_paths: Mutex::new(HashSet::new()),
            default_response: br#"{"probe":"ok"}"#.to_vec(),
            deny_watch: false,
            fail_daemon_set_apply: false,
            applied: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }
}

pub(crate) fn ready_pod(name: &str, node: &str) -> PodSnapshot {
    PodSnapshot {
        name: name.to_string(),
        node_name: Some(node.to_string()),
        phase: PodPhase::Running,
        ready: true,
        unschedulable: false,
    }
}

impl MockGateway {
    /// Two schedulable nodes, one ready sensor pod each.
    pub(crate) fn two_ready_nodes() -> Self {
        Self {
            nodes: vec!["node1".to_string(), "node2".to_string()],
            pods: vec![ready_pod("pod1", "node1"), ready_pod("pod2", "node2")],
            ..Self::default()
        }
    }

    pub(crate) fn set_response(&self, path: &str, body: &[u8]) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), body.to_vec());
    }

    pub(crate) fn fail_path(&self, path: &str) {
        self.failing_paths.lock().unwrap().insert(path.to_string());
    }

    pub(crate) fn applied_objects(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub(crate) fn deleted_objects(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn record_apply(&self, kind: &str, name: &str) {
        self.applied.lock().unwrap().push(format!("{kind}/{name}"));
    }
}

#[async_trait]
impl ClusterGateway for MockGateway {
    async fn list_node_names(&self) -> Result<Vec<String>, Report<ClusterError>> {
        Ok(self.nodes.clone())
    }

    async fn apply_namespace(
        &self,
        namespace: &Namespace,
    ) -> Result<Namespace, Report<ClusterError>> {
        let name = namespace.metadata.name.clone().unwrap_or_default();
        self.record_apply("Namespace", &name);
        Ok(namespace.clone())
    }

    async fn apply_daemon_set(
        &self,
        _namespace: &str,
        daemon_set: &DaemonSet,
    ) -> Result<DaemonSet, Report<ClusterError>> {
        let name = daemon_set.metadata.name.clone().unwrap_or_default();
        if self.fail_daemon_set_apply {
            return Err(Report::new(ClusterError::ApplyFailed {
                kind: "DaemonSet".to_string(),
                name,
            })
            .attach_printable("mock apply rejected"));
        }
        self.record_apply("DaemonSet", &name);
        Ok(daemon_set.clone())
    }

    async fn apply_dynamic(
        &self,
        _namespace: &str,
        object: &DynamicObject,
    ) -> Result<(), Report<ClusterError>> {
        let kind = object
            .types
            .as_ref()
            .map(|types| types.kind.clone())
            .unwrap_or_default();
        let name = object.metadata.name.clone().unwrap_or_default();
        self.record_apply(&kind, &name);
        Ok(())
    }

    async fn delete_daemon_set(
        &self,
        _namespace: &str,
        name: &str,
        _grace_period_seconds: u32,
    ) -> Result<(), Report<ClusterError>> {
        self.deleted
            .lock()
            .unwrap()
            .push(format!("DaemonSet/{name}"));
        Ok(())
    }

    async fn delete_namespace(
        &self,
        name: &str,
        _grace_period_seconds: u32,
    ) -> Result<(), Report<ClusterError>> {
        self.deleted
            .lock()
            .unwrap()
            .push(format!("Namespace/{name}"));
        Ok(())
    }

    async fn watch_pods(
        &self,
        _namespace: &str,
        _label_selector: &str,
    ) -> Result<PodEventStream, Report<ClusterError>> {
        if self.deny_watch {
            return Err(Report::new(ClusterError::WatchFailed {
                message: "mock watch permission denied".to_string(),
            }));
        }
        let events: Vec<Result<PodWatchEvent, Report<ClusterError>>> = self
            .pods
            .iter()
            .cloned()
            .map(|snapshot| Ok(PodWatchEvent::Added(snapshot)))
            .collect();
        Ok(futures::stream::iter(events)
            .chain(futures::stream::pending())
            .boxed())
    }

    async fn proxy_get(
        &self,
        _namespace: &str,
        pod_name: &str,
        _port: i32,
        path: &str,
    ) -> Result<Vec<u8>, Report<ClusterError>> {
        if self.failing_paths.lock().unwrap().contains(path) {
            return Err(Report::new(ClusterError::ProxyFailed {
                pod_name: pod_name.to_string(),
                path: path.to_string(),
                message: "mock sensor request failed".to_string(),
            }));
        }
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .get(path)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone()))
    }
}
