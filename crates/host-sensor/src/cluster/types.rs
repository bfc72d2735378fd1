use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;

/// Errors that can occur during cluster API operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster API is unreachable: {message}")]
    ApiUnreachable { message: String },
    #[error("failed to apply {kind} '{name}'")]
    ApplyFailed { kind: String, name: String },
    #[error("failed to delete {kind} '{name}'")]
    DeleteFailed { kind: String, name: String },
    #[error("failed to watch sensor pods: {message}")]
    WatchFailed { message: String },
    #[error("proxied GET '{path}' to pod '{pod_name}' failed: {message}")]
    ProxyFailed {
        pod_name: String,
        path: String,
        message: String,
    },
}

/// Pod lifecycle phase as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

/// The distilled view of a sensor pod the membership tracker operates
/// on. Extracted once per watch event at the gateway edge so the
/// tracker's state machine never touches raw cluster objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    pub name: String,
    /// Node the pod was scheduled to, or the node the scheduler tried
    /// to place it on (recovered from node-affinity match fields when
    /// the pod never got scheduled).
    pub node_name: Option<String>,
    pub phase: PodPhase,
    /// Whether the sensor container reported ready.
    pub ready: bool,
    /// Whether the scheduler flagged the pod unschedulable.
    pub unschedulable: bool,
}

impl PodSnapshot {
    pub fn from_pod(pod: &Pod) -> Self {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let status = pod.status.as_ref();

        let phase = match status.and_then(|s| s.phase.as_deref()) {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        };

        // The sensor is the first (and only) container of the pod.
        let ready = status
            .and_then(|s| s.container_statuses.as_ref())
            .and_then(|statuses| statuses.first())
            .map(|cs| cs.ready)
            .unwrap_or(false);

        let unschedulable = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions.iter().any(|condition| {
                    condition.type_ == "PodScheduled"
                        && condition.reason.as_deref() == Some("Unschedulable")
                })
            })
            .unwrap_or(false);

        let node_name = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.clone())
            .or_else(|| node_name_from_affinity(pod));

        Self {
            name,
            node_name,
            phase,
            ready,
            unschedulable,
        }
    }
}

/// Unscheduled pods carry no `spec.nodeName`; for daemonset pods the
/// intended node is pinned through a required node-affinity match
/// field on `metadata.name`.
fn node_name_from_affinity(pod: &Pod) -> Option<String> {
    pod.spec
        .as_ref()?
        .affinity
        .as_ref()?
        .node_affinity
        .as_ref()?
        .required_during_scheduling_ignored_during_execution
        .as_ref()?
        .node_selector_terms
        .iter()
        .filter_map(|term| term.match_fields.as_ref())
        .flatten()
        .find(|requirement| requirement.key == "metadata.name")
        .and_then(|requirement| requirement.values.as_ref())
        .and_then(|values| values.first())
        .cloned()
}

/// One pod watch event, already distilled to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodWatchEvent {
    Added(PodSnapshot),
    Modified(PodSnapshot),
    Deleted(PodSnapshot),
}

impl PodWatchEvent {
    pub fn snapshot(&self) -> &PodSnapshot {
        match self {
            PodWatchEvent::Added(snapshot)
            | PodWatchEvent::Modified(snapshot)
            | PodWatchEvent::Deleted(snapshot) => snapshot,
        }
    }
}
