//! Typed façade over the cluster API surface.
//!
//! All outbound cluster traffic of the subsystem flows through the
//! [`ClusterGateway`] trait: workload upserts, grace-period deletes,
//! label-selected pod watches and proxied HTTP GETs to sensor pods.
//! [`KubeGateway`] is the production implementation over a
//! [`kube::Client`]; tests substitute their own implementation.

pub mod gateway;
pub mod types;

pub use gateway::ClusterGateway;
pub use gateway::KubeGateway;
pub use gateway::PodEventStream;
pub use types::ClusterError;
pub use types::PodPhase;
pub use types::PodSnapshot;
pub use types::PodWatchEvent;
