//! Sensor rollout manifest.
//!
//! The rollout is described by a multi-document YAML manifest: exactly
//! one Namespace, exactly one DaemonSet whose pod template exposes a
//! container port named [`SENSOR_PORT_NAME`], and any number of
//! supporting objects applied as-is. A default manifest is compiled in;
//! a caller-supplied file replaces it wholesale.

use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Namespace;
use kube::core::DynamicObject;
use serde::Deserialize;

use crate::error::SensorError;

/// Reserved name of the sensor's container port.
pub const SENSOR_PORT_NAME: &str = "scanner";

const DEFAULT_MANIFEST: &str = include_str!("../assets/host-sensor.yaml");

/// One parsed manifest document, in manifest order.
#[derive(Debug, Clone)]
pub enum ManifestObject {
    Namespace(Namespace),
    DaemonSet(Box<DaemonSet>),
    Other(Box<DynamicObject>),
}

/// The parsed rollout manifest plus the values derived from it.
#[derive(Debug, Clone)]
pub struct SensorManifest {
    /// All documents, preserving manifest order.
    pub objects: Vec<ManifestObject>,
    /// Name of the unique Namespace object.
    pub namespace: String,
    /// Name of the unique DaemonSet object.
    pub daemon_set_name: String,
    /// Container port named [`SENSOR_PORT_NAME`].
    pub port: i32,
    /// Label selector string derived from the daemonset's matchLabels.
    pub label_selector: String,
}

impl SensorManifest {
    /// Load the embedded default manifest, or the override file when a
    /// path is supplied.
    pub fn load(override_path: Option<&Path>) -> Result<Self, Report<SensorError>> {
        match override_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).change_context(SensorError::config(
                    format!("failed to read manifest override '{}'", path.display()),
                ))?;
                Self::parse(&text)
            }
            None => Self::parse(DEFAULT_MANIFEST),
        }
    }

    /// Parse a multi-document YAML manifest and derive the rollout
    /// values from it.
    pub fn parse(text: &str) -> Result<Self, Report<SensorError>> {
        let mut objects = Vec::new();

        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_yaml::Value::deserialize(document)
                .change_context(SensorError::config("malformed manifest YAML"))?;
            if value.is_null() {
                continue;
            }
            let json = serde_json::to_value(&value)
                .change_context(SensorError::config("malformed manifest YAML"))?;
            let kind = json
                .get("kind")
                .and_then(|kind| kind.as_str())
                .ok_or_else(|| {
                    Report::new(SensorError::config("manifest document without a kind"))
                })?
                .to_string();

            let object = match kind.as_str() {
                "Namespace" => ManifestObject::Namespace(
                    serde_json::from_value(json)
                        .change_context(SensorError::config("invalid Namespace object"))?,
                ),
                "DaemonSet" => ManifestObject::DaemonSet(Box::new(
                    serde_json::from_value(json)
                        .change_context(SensorError::config("invalid DaemonSet object"))?,
                )),
                _ => ManifestObject::Other(Box::new(
                    serde_json::from_value(json).change_context(SensorError::config(format!(
                        "invalid manifest object of kind '{kind}'"
                    )))?,
                )),
            };
            objects.push(object);
        }

        let namespace = unique_namespace_name(&objects)?;
        let daemon_set = unique_daemon_set(&objects)?;
        let daemon_set_name = daemon_set
            .metadata
            .name
            .clone()
            .ok_or_else(|| Report::new(SensorError::config("daemonset has no metadata.name")))?;
        let port = sensor_port(daemon_set)?;
        let label_selector = selector_string(daemon_set)?;

        Ok(Self {
            objects,
            namespace,
            daemon_set_name,
            port,
            label_selector,
        })
    }
}

fn unique_namespace_name(objects: &[ManifestObject]) -> Result<String, Report<SensorError>> {
    let mut names = objects.iter().filter_map(|object| match object {
        ManifestObject::Namespace(namespace) => namespace.metadata.name.clone(),
        _ => None,
    });
    let name = names.next().ok_or_else(|| {
        Report::new(SensorError::config(
            "manifest does not declare a Namespace object",
        ))
    })?;
    if names.next().is_some() {
        return Err(Report::new(SensorError::config(
            "manifest declares more than one Namespace object",
        )));
    }
    Ok(name)
}

fn unique_daemon_set(objects: &[ManifestObject]) -> Result<&DaemonSet, Report<SensorError>> {
    let mut daemon_sets = objects.iter().filter_map(|object| match object {
        ManifestObject::DaemonSet(daemon_set) => Some(daemon_set.as_ref()),
        _ => None,
    });
    let daemon_set = daemon_sets.next().ok_or_else(|| {
        Report::new(SensorError::config(
            "manifest does not declare a DaemonSet object",
        ))
    })?;
    if daemon_sets.next().is_some() {
        return Err(Report::new(SensorError::config(
            "manifest declares more than one DaemonSet object",
        )));
    }
    Ok(daemon_set)
}

fn sensor_port(daemon_set: &DaemonSet) -> Result<i32, Report<SensorError>> {
    daemon_set
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .map(|pod_spec| pod_spec.containers.as_slice())
        .unwrap_or_default()
        .iter()
        .filter_map(|container| container.ports.as_ref())
        .flatten()
        .find(|port| port.name.as_deref() == Some(SENSOR_PORT_NAME))
        .map(|port| port.container_port)
        .ok_or_else(|| {
            Report::new(SensorError::config(format!(
                "daemonset declares no container port named '{SENSOR_PORT_NAME}'"
            )))
        })
}

fn selector_string(daemon_set: &DaemonSet) -> Result<String, Report<SensorError>> {
    let labels = daemon_set
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.match_labels.as_ref())
        .filter(|labels| !labels.is_empty())
        .ok_or_else(|| {
            Report::new(SensorError::config(
                "daemonset declares no matchLabels selector",
            ))
        })?;
    Ok(labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(","))
}
