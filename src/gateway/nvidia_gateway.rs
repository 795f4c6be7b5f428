use nvml_wrapper::{Device, Nvml, error::NvmlError};
use tracing::{debug, info};

use crate::gateway::{DeviceGateway, GatewayError, PowerConstraints};

// NVML backed gateway.
// The NVML session is opened once and shut down when the gateway is
// dropped, device handles are resolved again on every call
pub struct NvmlGateway {
    nvml: Nvml,
}

impl NvmlGateway {
    pub fn init() -> Result<Self, NvmlError> {
        let nvml = Nvml::init()?;

        info!("NVML successfully initialized");
        if let Ok(version) = nvml.sys_driver_version() {
            debug!("NVIDIA driver version: {}", version);
        }

        Ok(Self { nvml })
    }

    // Return a NVML device handle.
    // An invalid index is reported as a missing device
    fn device(&self, index: u32) -> Result<Device<'_>, GatewayError> {
        self.nvml.device_by_index(index).map_err(|err| match err {
            NvmlError::InvalidArg | NvmlError::NotFound => {
                GatewayError::DeviceNotFound(index)
            }
            err => GatewayError::Nvml(err),
        })
    }
}

impl DeviceGateway for NvmlGateway {
    fn device_count(&self) -> Result<u32, GatewayError> {
        Ok(self.nvml.device_count()?)
    }

    fn name(&self, index: u32) -> Result<String, GatewayError> {
        Ok(self.device(index)?.name()?)
    }

    #[allow(deprecated)]
    fn is_power_management_supported(
        &self,
        index: u32,
    ) -> Result<bool, GatewayError> {
        Ok(self.device(index)?.is_power_management_algo_active()?)
    }

    fn power_limit(&self, index: u32) -> Result<u32, GatewayError> {
        Ok(self.device(index)?.power_management_limit()?)
    }

    fn power_limit_constraints(
        &self,
        index: u32,
    ) -> Result<PowerConstraints, GatewayError> {
        let constraints =
            self.device(index)?.power_management_limit_constraints()?;

        Ok(PowerConstraints {
            min_limit: constraints.min_limit,
            max_limit: constraints.max_limit,
        })
    }

    fn power_usage(&self, index: u32) -> Result<u32, GatewayError> {
        Ok(self.device(index)?.power_usage()?)
    }

    fn set_power_limit(
        &mut self,
        index: u32,
        limit: u32,
    ) -> Result<(), GatewayError> {
        let mut device = self.device(index)?;
        device.set_power_management_limit(limit)?;

        Ok(())
    }
}
