use thiserror::Error;

/// Errors surfaced at the subsystem boundary.
///
/// The subsystem prefers degradation over abort: per-pod proxy failures
/// are logged and dropped inside the worker pool, and kinds that yield
/// no data are reported through the status map. Only a broken
/// configuration or an unusable cluster is terminal.
#[derive(Debug, Error)]
pub enum SensorError {
    /// Invalid or missing manifest, or no cluster gateway was supplied.
    /// No rollout has been performed.
    #[error("invalid host-sensor configuration: {message}")]
    Config { message: String },

    /// The cluster itself is unusable (unreachable API, zero nodes).
    /// Nothing was applied, so no teardown is required.
    #[error("cluster is not usable: {message}")]
    FatalCluster { message: String },

    /// A create-or-update failed mid-apply. Teardown of the target
    /// namespace has already been attempted.
    #[error("host-sensor rollout failed: {message}")]
    Rollout { message: String },

    /// Every ready sensor pod failed the version probe.
    #[error("host-sensor version probe failed: {message}")]
    VersionProbe { message: String },
}

impl SensorError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        SensorError::Config {
            message: message.into(),
        }
    }
}
