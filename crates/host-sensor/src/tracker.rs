//! Pod membership tracking.
//!
//! A single background task consumes the sensor pod watch and keeps
//! two maps current: pods whose sensor container is ready, and pods
//! the scheduler could not place. Both map pod name to node identity.
//! The task is the sole writer; the rollout controller and collector
//! snapshot the maps through the read lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use error_stack::Report;
use futures::StreamExt;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::cluster::ClusterError;
use crate::cluster::ClusterGateway;
use crate::cluster::PodPhase;
use crate::cluster::PodWatchEvent;

/// Delay before re-establishing a failed watch.
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct MembershipMaps {
    /// Pods with phase Running and a ready sensor container.
    ready: HashMap<String, String>,
    /// Pending pods the scheduler flagged unschedulable.
    unschedulable: HashMap<String, String>,
}

/// Shared, read-snapshot view of the sensor fleet membership.
#[derive(Clone, Debug, Default)]
pub struct PodMembership {
    maps: Arc<RwLock<MembershipMaps>>,
}

impl PodMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the ready pods as `(pod name, node identity)` pairs.
    pub fn ready_pods(&self) -> Vec<(String, String)> {
        let maps = self.maps.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        maps.ready
            .iter()
            .map(|(pod, node)| (pod.clone(), node.clone()))
            .collect()
    }

    /// Current `(ready, unschedulable)` pod counts.
    pub fn counts(&self) -> (usize, usize) {
        let maps = self.maps.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        (maps.ready.len(), maps.unschedulable.len())
    }

    fn apply(&self, event: &PodWatchEvent) {
        let mut maps = self.maps.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        apply_event(&mut maps, event);
    }

    /// Spawn the watch consumer. It runs until the token is cancelled,
    /// re-establishing the watch stream whenever it ends or fails.
    pub(crate) fn spawn_tracker<G: ClusterGateway>(
        &self,
        gateway: Arc<G>,
        namespace: String,
        label_selector: String,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        let membership = self.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = cancellation_token.cancelled() => {
                        info!("pod membership tracker shutdown requested");
                        break;
                    }
                    result = membership.consume_watch(gateway.as_ref(), &namespace, &label_selector) => {
                        match result {
                            Ok(()) => {
                                warn!("sensor pod watch stream ended unexpectedly, re-establishing");
                            }
                            Err(error) => {
                                error!("sensor pod watch failed: {error:?}");
                                tokio::time::sleep(WATCH_RETRY_DELAY).await;
                            }
                        }
                    }
                }
            }
        })
    }

    async fn consume_watch<G: ClusterGateway>(
        &self,
        gateway: &G,
        namespace: &str,
        label_selector: &str,
    ) -> Result<(), Report<ClusterError>> {
        let mut stream = gateway.watch_pods(namespace, label_selector).await?;

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.apply(&event),
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }
}

/// The tracker state machine: a pure function of (event, current maps).
///
/// Entering one state removes the pod from the other, so the two maps
/// stay disjoint. Events for pods that satisfy neither predicate clear
/// the pod everywhere.
fn apply_event(maps: &mut MembershipMaps, event: &PodWatchEvent) {
    match event {
        PodWatchEvent::Added(snapshot) | PodWatchEvent::Modified(snapshot) => {
            if snapshot.phase == PodPhase::Running && snapshot.ready {
                maps.unschedulable.remove(&snapshot.name);
                maps.ready.insert(
                    snapshot.name.clone(),
                    snapshot.node_name.clone().unwrap_or_default(),
                );
            } else if snapshot.phase == PodPhase::Pending && snapshot.unschedulable {
                maps.ready.remove(&snapshot.name);
                maps.unschedulable.insert(
                    snapshot.name.clone(),
                    snapshot.node_name.clone().unwrap_or_default(),
                );
            } else {
                maps.ready.remove(&snapshot.name);
                maps.unschedulable.remove(&snapshot.name);
            }
        }
        PodWatchEvent::Deleted(snapshot) => {
            maps.ready.remove(&snapshot.name);
            maps.unschedulable.remove(&snapshot.name);
        }
    }
}
