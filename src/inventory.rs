use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::{
    device_record::DeviceRecord,
    errors::PowerError,
    gateway::{DeviceGateway, GatewayError},
};

// Per device failures of a refresh
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    pub device_count: u32,
    pub failed: BTreeMap<u32, GatewayError>,
}

// Snapshot of the state of every GPU on the system.
// The record of a device is stored at the position of its index
#[derive(Debug, Default, Clone)]
pub struct InventoryCache {
    records: Vec<DeviceRecord>,
}

impl InventoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    // Rebuild the whole snapshot from the gateway.
    // Only a failing device count aborts the refresh, in that case the
    // current snapshot is kept. A device whose queries fail is still
    // inserted with the fields read before the failure
    pub fn refresh(
        &mut self,
        gateway: &dyn DeviceGateway,
    ) -> Result<RefreshOutcome, PowerError> {
        let device_count =
            gateway.device_count().map_err(PowerError::DeviceCount)?;

        let mut outcome = RefreshOutcome {
            device_count,
            ..Default::default()
        };
        let mut records = Vec::with_capacity(device_count as usize);

        for index in 0..device_count {
            let mut record = DeviceRecord::new(index);

            if let Err(err) = record.update(gateway) {
                warn!("Failed to get info for GPU {}: {}", index, err);
                outcome.failed.insert(index, err);
            }

            records.push(record);
        }

        self.records = records;

        debug!(
            "GPU cache refreshed: {} devices, {} failed",
            device_count,
            outcome.failed.len()
        );

        Ok(outcome)
    }

    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    pub fn get(&self, index: u32) -> Option<&DeviceRecord> {
        self.records.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
