use metrics_exporter_prometheus::BuildError;
use thiserror::Error;

use sync_common::error::{ConfigError, StoreError};

/// Enumeration of errors that stop the worker from starting.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    EnvError(#[from] envconfig::Error),
    #[error("invalid configuration: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("failed to open the store: {0}")]
    StoreError(#[from] StoreError),
    #[error("failed to install the metrics recorder: {0}")]
    MetricsError(#[from] BuildError),
    #[error("liveness deadline is out of range")]
    DeadlineError(#[from] time::error::ConversionRange),
}
