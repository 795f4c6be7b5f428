use nvml_wrapper::error::NvmlError;
use thiserror::Error;

pub mod nvidia_gateway;

#[cfg(test)]
pub mod mock_gateway;

pub use nvidia_gateway::NvmlGateway;

// Power limit bounds reported by the driver, in milliwatts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PowerConstraints {
    pub min_limit: u32,
    pub max_limit: u32,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("GPU {0} not found")]
    DeviceNotFound(u32),
    #[error(transparent)]
    Nvml(#[from] NvmlError),
    #[error("{0}")]
    Other(String),
}

// Access to the GPUs of the system.
// Every device is addressed by its enumeration index, all power
// values are in milliwatts
pub trait DeviceGateway: Send + Sync {
    // Number of devices currently enumerated
    fn device_count(&self) -> Result<u32, GatewayError>;

    fn name(&self, index: u32) -> Result<String, GatewayError>;

    // Return true if the device power limit can be read and changed
    fn is_power_management_supported(
        &self,
        index: u32,
    ) -> Result<bool, GatewayError>;

    fn power_limit(&self, index: u32) -> Result<u32, GatewayError>;
    fn power_limit_constraints(
        &self,
        index: u32,
    ) -> Result<PowerConstraints, GatewayError>;
    fn power_usage(&self, index: u32) -> Result<u32, GatewayError>;

    // Write a new power limit, the value must already lie inside
    // the device constraints
    fn set_power_limit(
        &mut self,
        index: u32,
        limit: u32,
    ) -> Result<(), GatewayError>;
}
