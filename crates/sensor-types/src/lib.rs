//! Shared host-sensor data types
//!
//! This crate contains the types exchanged between the host-sensor
//! orchestration subsystem and its consumers: the enumerated sensor
//! endpoints, the data envelopes wrapping raw sensor payloads, and the
//! per-kind status map reported for kinds that produced no data.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;

/// API group of the emitted envelopes. Treated as data downstream,
/// never parsed by the subsystem itself.
pub const API_GROUP: &str = "hostdata.securek8s.io";

/// API version of the emitted envelopes.
pub const API_VERSION: &str = "v1beta0";

/// Out-of-band sensor version endpoint. Not a collected resource kind.
pub const VERSION_PATH: &str = "/version";

/// Returns the `group/version` string stamped on every envelope.
pub fn api_version() -> String {
    format!("{API_GROUP}/{API_VERSION}")
}

/// One queryable endpoint of the node-local sensor.
///
/// Each kind pins an exact HTTP path on the sensor's container port and
/// the kind string stamped on the resulting envelopes. The paths are
/// part of the wire contract with the sensor binary and must not drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    OsRelease,
    KernelVersion,
    LinuxSecurityHardening,
    OpenPorts,
    KernelVariables,
    KubeletInfo,
    KubeProxyInfo,
    CloudProviderInfo,
    CNIInfo,
    ControlPlaneInfo,
    KubeletConfiguration,
    KubeletCommandLine,
}

/// The fixed collection sequence driven by the collector.
///
/// CloudProviderInfo must precede ControlPlaneInfo: a non-empty cloud
/// provider payload suppresses the control-plane probe, so reordering
/// this sequence is unsafe. The two kubelet kinds are collected through
/// dedicated operations and are deliberately absent here.
pub const COLLECTION_SEQUENCE: [ResourceKind; 10] = [
    ResourceKind::OsRelease,
    ResourceKind::KernelVersion,
    ResourceKind::LinuxSecurityHardening,
    ResourceKind::OpenPorts,
    ResourceKind::KernelVariables,
    ResourceKind::KubeletInfo,
    ResourceKind::KubeProxyInfo,
    ResourceKind::CloudProviderInfo,
    ResourceKind::CNIInfo,
    ResourceKind::ControlPlaneInfo,
];

impl ResourceKind {
    /// HTTP path on the sensor, exact string pinned by the remote binary.
    pub fn path(&self) -> &'static str {
        match self {
            ResourceKind::OsRelease => "/osRelease",
            ResourceKind::KernelVersion => "/kernelVersion",
            ResourceKind::LinuxSecurityHardening => "/linuxSecurityHardening",
            ResourceKind::OpenPorts => "/openedPorts",
            ResourceKind::KernelVariables => "/LinuxKernelVariables",
            ResourceKind::KubeletInfo => "/kubeletInfo",
            ResourceKind::KubeProxyInfo => "/kubeProxyInfo",
            ResourceKind::CloudProviderInfo => "/cloudProviderInfo",
            ResourceKind::CNIInfo => "/CNIInfo",
            ResourceKind::ControlPlaneInfo => "/controlPlaneInfo",
            ResourceKind::KubeletConfiguration => "/kubeletConfigurations",
            ResourceKind::KubeletCommandLine => "/kubeletCommandLine",
        }
    }

    /// Kind string stamped on emitted envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKind::OsRelease => "OsReleaseFile",
            ResourceKind::KernelVersion => "KernelVersion",
            ResourceKind::LinuxSecurityHardening => "LinuxSecurityHardeningStatus",
            ResourceKind::OpenPorts => "OpenPortsList",
            ResourceKind::KernelVariables => "LinuxKernelVariables",
            ResourceKind::KubeletInfo => "KubeletInfo",
            ResourceKind::KubeProxyInfo => "KubeProxyInfo",
            ResourceKind::CloudProviderInfo => "CloudProviderInfo",
            ResourceKind::CNIInfo => "CNIInfo",
            ResourceKind::ControlPlaneInfo => "ControlPlaneInfo",
            ResourceKind::KubeletConfiguration => "KubeletConfiguration",
            ResourceKind::KubeletCommandLine => "KubeletCommandLine",
        }
    }

    /// `group/version/kind` key used in the status map.
    pub fn group_version_kind(&self) -> String {
        format!("{API_GROUP}/{API_VERSION}/{}", self.kind())
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// One unit of collected host data: the raw payload of a single sensor
/// endpoint on a single node.
///
/// Envelopes are append-only; the subsystem never mutates them after
/// emission. `name` carries the node identity the payload came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEnvelope {
    pub api_version: String,
    pub kind: String,
    /// Node identity the sensor pod ran on.
    pub name: String,
    /// Verbatim payload bytes as returned by the sensor.
    #[serde(serialize_with = "serialize_payload")]
    pub data: Vec<u8>,
}

impl DataEnvelope {
    pub fn new(kind: ResourceKind, node_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            api_version: api_version(),
            kind: kind.kind().to_string(),
            name: node_name.into(),
            data,
        }
    }
}

/// Serialize the payload verbatim when it already is valid JSON, the
/// way the sensor emits it; fall back to a JSON string otherwise.
fn serialize_payload<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    match serde_json::from_slice::<&serde_json::value::RawValue>(data) {
        Ok(raw) => raw.serialize(serializer),
        Err(_) => serializer.serialize_str(&String::from_utf8_lossy(data)),
    }
}

/// Outcome tag for a kind that collected nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindOutcome {
    Skipped,
}

/// Status entry for a resource kind that produced no envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStatus {
    pub status: KindOutcome,
    pub info: String,
}

/// Per-kind status map, keyed by `group/version/kind`.
///
/// Kinds that collected at least one envelope have no entry here; a
/// kind is either represented by envelopes or by a status, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScanStatuses(BTreeMap<String, KindStatus>);

impl ScanStatuses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a kind as skipped with the given reason.
    pub fn mark_skipped(&mut self, kind: ResourceKind, info: impl Into<String>) {
        self.0.insert(
            kind.group_version_kind(),
            KindStatus {
                status: KindOutcome::Skipped,
                info: info.into(),
            },
        );
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&KindStatus> {
        self.0.get(&kind.group_version_kind())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &KindStatus)> {
        self.0.iter()
    }
}

impl Serialize for ScanStatuses {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
