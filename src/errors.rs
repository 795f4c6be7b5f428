use std::time::Duration;

use thiserror::Error;

use crate::gateway::GatewayError;

// Errors of the power limit operations
#[derive(Debug, Error)]
pub enum PowerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("Failed to get device count: {0}")]
    DeviceCount(#[source] GatewayError),
    #[error("power management not supported on GPU {0}")]
    UnsupportedOperation(u32),
    #[error("Invalid mode '{0}' (must be 'all' or 'manual')")]
    InvalidMode(String),
    #[error("GPU {index} doesn't exist ({count} GPUs found)")]
    IndexOutOfRange { index: i64, count: u32 },
    #[error("GPU call timed out after {0:?}")]
    Timeout(Duration),
    #[error("GPU task failed: {0}")]
    TaskFailed(String),
}
