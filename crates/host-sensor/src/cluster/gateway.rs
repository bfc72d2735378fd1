use std::path::PathBuf;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::core::ApiResource;
use kube::core::DynamicObject;
use kube::core::GroupVersion;
use kube::core::GroupVersionKind;
use kube::runtime::watcher;
use kube::Api;
use kube::Client;

use crate::cluster::types::ClusterError;
use crate::cluster::types::PodSnapshot;
use crate::cluster::types::PodWatchEvent;

/// Field manager recorded on server-side-apply patches.
const FIELD_MANAGER: &str = "host-sensor-orchestrator";

/// Stream of distilled pod watch events. Callers re-establish the
/// stream when it ends or errors.
pub type PodEventStream = BoxStream<'static, Result<PodWatchEvent, Report<ClusterError>>>;

/// The cluster operations the subsystem needs.
///
/// Kept as a trait so the rollout, tracker and collector can be driven
/// against an in-memory gateway in tests. All callers use logical
/// names only; authentication and endpoint discovery belong to the
/// implementation.
#[async_trait]
pub trait ClusterGateway: Send + Sync + 'static {
    /// Names of every node currently registered in the cluster.
    async fn list_node_names(&self) -> Result<Vec<String>, Report<ClusterError>>;

    /// Create-or-update the namespace, returning the applied object.
    async fn apply_namespace(
        &self,
        namespace: &Namespace,
    ) -> Result<Namespace, Report<ClusterError>>;

    /// Create-or-update the daemonset in the given namespace.
    async fn apply_daemon_set(
        &self,
        namespace: &str,
        daemon_set: &DaemonSet,
    ) -> Result<DaemonSet, Report<ClusterError>>;

    /// Create-or-update any other (namespaced) manifest object.
    async fn apply_dynamic(
        &self,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<(), Report<ClusterError>>;

    /// Delete the daemonset; missing resources count as success.
    async fn delete_daemon_set(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<(), Report<ClusterError>>;

    /// Delete the namespace; missing resources count as success.
    async fn delete_namespace(
        &self,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<(), Report<ClusterError>>;

    /// Open a pod watch filtered by label selector.
    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<PodEventStream, Report<ClusterError>>;

    /// HTTP GET to a pod port routed through the control plane's
    /// pod-proxy endpoint. Returns the raw response body.
    async fn proxy_get(
        &self,
        namespace: &str,
        pod_name: &str,
        port: i32,
        path: &str,
    ) -> Result<Vec<u8>, Report<ClusterError>>;
}

/// Production gateway over a [`kube::Client`].
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using an explicit kubeconfig file, or the default
    /// configuration (in-cluster or `~/.kube/config`).
    pub async fn connect(kubeconfig: Option<PathBuf>) -> Result<Self, Report<ClusterError>> {
        let client = match kubeconfig {
            Some(kubeconfig_path) => {
                let kubeconfig = Kubeconfig::read_from(&kubeconfig_path).change_context(
                    ClusterError::ApiUnreachable {
                        message: format!(
                            "failed to read kubeconfig file: {}",
                            kubeconfig_path.display()
                        ),
                    },
                )?;

                let config =
                    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .change_context(ClusterError::ApiUnreachable {
                            message: format!(
                                "failed to create config from kubeconfig: {}",
                                kubeconfig_path.display()
                            ),
                        })?;

                Client::try_from(config).change_context(ClusterError::ApiUnreachable {
                    message: "failed to create cluster client from custom kubeconfig".to_string(),
                })?
            }
            None => Client::try_default()
                .await
                .change_context(ClusterError::ApiUnreachable {
                    message: "failed to create cluster client".to_string(),
                })?,
        };
        Ok(Self::new(client))
    }
}

fn object_name(metadata: &ObjectMeta, kind: &str) -> Result<String, Report<ClusterError>> {
    metadata.name.clone().ok_or_else(|| {
        Report::new(ClusterError::ApplyFailed {
            kind: kind.to_string(),
            name: "<unnamed>".to_string(),
        })
        .attach_printable("object has no metadata.name")
    })
}

fn grace(seconds: u32) -> DeleteParams {
    DeleteParams {
        grace_period_seconds: Some(seconds),
        ..DeleteParams::default()
    }
}

fn tolerate_not_found<T>(result: Result<T, kube::Error>) -> Result<(), kube::Error> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(error) => Err(error),
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn list_node_names(&self) -> Result<Vec<String>, Report<ClusterError>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .change_context(ClusterError::ApiUnreachable {
                message: "failed to list cluster nodes".to_string(),
            })?;
        Ok(nodes
            .into_iter()
            .filter_map(|node| node.metadata.name)
            .collect())
    }

    async fn apply_namespace(
        &self,
        namespace: &Namespace,
    ) -> Result<Namespace, Report<ClusterError>> {
        let name = object_name(&namespace.metadata, "Namespace")?;
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(namespace),
        )
        .await
        .change_context(ClusterError::ApplyFailed {
            kind: "Namespace".to_string(),
            name,
        })
    }

    async fn apply_daemon_set(
        &self,
        namespace: &str,
        daemon_set: &DaemonSet,
    ) -> Result<DaemonSet, Report<ClusterError>> {
        let name = object_name(&daemon_set.metadata, "DaemonSet")?;
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(daemon_set),
        )
        .await
        .change_context(ClusterError::ApplyFailed {
            kind: "DaemonSet".to_string(),
            name,
        })
    }

    async fn apply_dynamic(
        &self,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<(), Report<ClusterError>> {
        let types = object.types.clone().ok_or_else(|| {
            Report::new(ClusterError::ApplyFailed {
                kind: "<unknown>".to_string(),
                name: object.metadata.name.clone().unwrap_or_default(),
            })
            .attach_printable("object has no apiVersion/kind")
        })?;
        let name = object_name(&object.metadata, &types.kind)?;
        let group_version: GroupVersion =
            types
                .api_version
                .parse::<GroupVersion>()
                .change_context(ClusterError::ApplyFailed {
                    kind: types.kind.clone(),
                    name: name.clone(),
                })?;
        let gvk = GroupVersionKind::gvk(&group_version.group, &group_version.version, &types.kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(object),
        )
        .await
        .change_context(ClusterError::ApplyFailed {
            kind: types.kind,
            name,
        })?;
        Ok(())
    }

    async fn delete_daemon_set(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<(), Report<ClusterError>> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        tolerate_not_found(api.delete(name, &grace(grace_period_seconds)).await).change_context(
            ClusterError::DeleteFailed {
                kind: "DaemonSet".to_string(),
                name: name.to_string(),
            },
        )
    }

    async fn delete_namespace(
        &self,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<(), Report<ClusterError>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        tolerate_not_found(api.delete(name, &grace(grace_period_seconds)).await).change_context(
            ClusterError::DeleteFailed {
                kind: "Namespace".to_string(),
                name: name.to_string(),
            },
        )
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<PodEventStream, Report<ClusterError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let config = watcher::Config::default().labels(label_selector);

        let stream = watcher::watcher(api, config)
            .flat_map(|event| {
                let events: Vec<Result<PodWatchEvent, Report<ClusterError>>> = match event {
                    Ok(watcher::Event::Applied(pod)) => {
                        vec![Ok(PodWatchEvent::Modified(PodSnapshot::from_pod(&pod)))]
                    }
                    Ok(watcher::Event::Deleted(pod)) => {
                        vec![Ok(PodWatchEvent::Deleted(PodSnapshot::from_pod(&pod)))]
                    }
                    Ok(watcher::Event::Restarted(pods)) => pods
                        .iter()
                        .map(|pod| Ok(PodWatchEvent::Added(PodSnapshot::from_pod(pod))))
                        .collect(),
                    Err(error) => vec![Err(Report::new(ClusterError::WatchFailed {
                        message: error.to_string(),
                    }))],
                };
                futures::stream::iter(events)
            })
            .boxed();

        Ok(stream)
    }

    async fn proxy_get(
        &self,
        namespace: &str,
        pod_name: &str,
        port: i32,
        path: &str,
    ) -> Result<Vec<u8>, Report<ClusterError>> {
        // Same route client-go's ProxyGet takes: the API server's
        // pod-proxy sub-resource, scheme pinned to plain HTTP.
        let uri = format!(
            "/api/v1/namespaces/{namespace}/pods/http:{pod_name}:{port}/proxy{path}"
        );
        let request = http::Request::get(uri.as_str())
            .body(Vec::new())
            .map_err(|error| {
                Report::new(ClusterError::ProxyFailed {
                    pod_name: pod_name.to_string(),
                    path: path.to_string(),
                    message: error.to_string(),
                })
            })?;

        let body = self
            .client
            .request_text(request)
            .await
            .map_err(|error| {
                Report::new(ClusterError::ProxyFailed {
                    pod_name: pod_name.to_string(),
                    path: path.to_string(),
                    message: error.to_string(),
                })
            })?;
        Ok(body.into_bytes())
    }
}
