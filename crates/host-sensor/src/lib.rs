//! Host sensor orchestration.
//!
//! Deploys a privileged sensor daemonset onto every schedulable node,
//! tracks the resulting pod fleet, collects typed host data envelopes
//! through the apiserver proxy and removes all cluster-side state when
//! the scan is over.
//!
//! [`HostSensorHandler`] is the entry point; [`ClusterGateway`] is the
//! seam between the orchestration logic and the real cluster.

pub mod cluster;
mod collector;
pub mod error;
pub mod handler;
pub mod logging;
pub mod manifest;
mod pool;
pub(crate) mod rollout;
mod teardown;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;

pub use cluster::ClusterGateway;
pub use cluster::KubeGateway;
pub use error::SensorError;
pub use handler::HostSensorHandler;
