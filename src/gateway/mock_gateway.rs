use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use crate::gateway::{DeviceGateway, GatewayError, PowerConstraints};

// A fake device, power values in milliwatts
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    pub name: Option<String>,
    pub supported: bool,
    pub limit: u32,
    pub constraints: PowerConstraints,
    pub usage: Option<u32>,

    pub fail_support_query: bool,
    pub fail_limit_query: bool,
    pub fail_constraints_query: bool,
    pub fail_writes: bool,
}

impl MockDevice {
    pub fn supported(name: &str, min: u32, max: u32, limit: u32) -> Self {
        Self {
            name: Some(name.to_string()),
            supported: true,
            limit,
            constraints: PowerConstraints {
                min_limit: min,
                max_limit: max,
            },
            usage: Some(min / 2),
            ..Default::default()
        }
    }

    pub fn unsupported(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn without_name(mut self) -> Self {
        self.name = None;
        self
    }

    pub fn without_usage(mut self) -> Self {
        self.usage = None;
        self
    }

    pub fn failing_support_query(mut self) -> Self {
        self.fail_support_query = true;
        self
    }

    pub fn failing_limit_query(mut self) -> Self {
        self.fail_limit_query = true;
        self
    }

    pub fn failing_constraints_query(mut self) -> Self {
        self.fail_constraints_query = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

// Calls observed by a mock gateway, shared with the test
#[derive(Debug, Default)]
pub struct MockLog {
    calls: AtomicUsize,
    writes: Mutex<Vec<(u32, u32)>>,
}

impl MockLog {
    // Total number of gateway calls, reads included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    // Successful writes as (index, milliwatts)
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.writes.lock().unwrap().clone()
    }
}

#[derive(Debug, Default)]
pub struct MockGateway {
    devices: Vec<MockDevice>,
    fail_count: bool,
    log: Arc<MockLog>,
}

impl MockGateway {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    pub fn failing_count(mut self) -> Self {
        self.fail_count = true;
        self
    }

    pub fn log(&self) -> Arc<MockLog> {
        self.log.clone()
    }

    fn device(&self, index: u32) -> Result<&MockDevice, GatewayError> {
        self.log.calls.fetch_add(1, Ordering::SeqCst);

        self.devices
            .get(index as usize)
            .ok_or(GatewayError::DeviceNotFound(index))
    }
}

fn injected(what: &str, index: u32) -> GatewayError {
    GatewayError::Other(format!("injected {what} failure on GPU {index}"))
}

impl DeviceGateway for MockGateway {
    fn device_count(&self) -> Result<u32, GatewayError> {
        self.log.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_count {
            return Err(GatewayError::Other("driver not loaded".to_string()));
        }

        Ok(self.devices.len() as u32)
    }

    fn name(&self, index: u32) -> Result<String, GatewayError> {
        self.device(index)?
            .name
            .clone()
            .ok_or_else(|| injected("name", index))
    }

    fn is_power_management_supported(
        &self,
        index: u32,
    ) -> Result<bool, GatewayError> {
        let device = self.device(index)?;
        if device.fail_support_query {
            return Err(injected("power management mode", index));
        }

        Ok(device.supported)
    }

    fn power_limit(&self, index: u32) -> Result<u32, GatewayError> {
        let device = self.device(index)?;
        if device.fail_limit_query {
            return Err(injected("power limit", index));
        }

        Ok(device.limit)
    }

    fn power_limit_constraints(
        &self,
        index: u32,
    ) -> Result<PowerConstraints, GatewayError> {
        let device = self.device(index)?;
        if device.fail_constraints_query {
            return Err(injected("constraints", index));
        }

        Ok(device.constraints)
    }

    fn power_usage(&self, index: u32) -> Result<u32, GatewayError> {
        self.device(index)?
            .usage
            .ok_or_else(|| injected("power usage", index))
    }

    fn set_power_limit(
        &mut self,
        index: u32,
        limit: u32,
    ) -> Result<(), GatewayError> {
        if self.device(index)?.fail_writes {
            return Err(injected("write", index));
        }

        self.devices[index as usize].limit = limit;
        self.log.writes.lock().unwrap().push((index, limit));

        Ok(())
    }
}
