use serde::Serialize;

use crate::gateway::{DeviceGateway, GatewayError};

pub const MILLIWATTS_PER_WATT: u32 = 1000;

const UNKNOWN_NAME: &str = "Unknown";

// Convert a NVML milliwatt value to whole watts, truncating
pub fn to_watts(milliwatts: u32) -> u32 {
    milliwatts / MILLIWATTS_PER_WATT
}

/// Power state of a single GPU, all values in watts.
///
/// When `supported` is false the limit fields are left at zero and the
/// device must never be written to.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub index: u32,
    pub name: String,

    // Current power limit and its allowed range
    pub power_limit: u32,
    pub min_limit: u32,
    pub max_limit: u32,

    // Current draw, zero if the driver can't report it
    pub power_usage: u32,

    #[serde(rename = "powerManagement")]
    pub supported: bool,
}

impl DeviceRecord {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    // Read the device state from the gateway.
    // Fields are filled in order, on error the record keeps
    // whatever was read before the failing query
    pub fn update(
        &mut self,
        gateway: &dyn DeviceGateway,
    ) -> Result<(), GatewayError> {
        let index = self.index;

        self.name = gateway
            .name(index)
            .unwrap_or_else(|_| UNKNOWN_NAME.to_string());

        self.supported = gateway.is_power_management_supported(index)?;
        if !self.supported {
            return Ok(());
        }

        self.power_limit = to_watts(gateway.power_limit(index)?);

        let constraints = gateway.power_limit_constraints(index)?;
        self.min_limit = to_watts(constraints.min_limit);
        self.max_limit = to_watts(constraints.max_limit);

        // Power usage is best effort
        self.power_usage = gateway.power_usage(index).map(to_watts).unwrap_or(0);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock_gateway::{MockDevice, MockGateway};

    #[test]
    fn update_reads_supported_device() {
        let gateway = MockGateway::new(vec![
            MockDevice::supported("RTX 4090", 150_000, 450_999, 300_500)
                .without_usage(),
        ]);

        let mut record = DeviceRecord::new(0);
        record.update(&gateway).unwrap();

        assert_eq!(
            record,
            DeviceRecord {
                index: 0,
                name: "RTX 4090".to_string(),
                power_limit: 300,
                min_limit: 150,
                max_limit: 450,
                power_usage: 0,
                supported: true,
            }
        );
    }

    #[test]
    fn update_stops_early_on_unsupported_device() {
        let gateway = MockGateway::new(vec![
            MockDevice::unsupported("GT 710").without_name(),
        ]);

        let mut record = DeviceRecord::new(0);
        record.update(&gateway).unwrap();

        assert_eq!(record.name, "Unknown");
        assert!(!record.supported);
        assert_eq!(record.power_limit, 0);
        assert_eq!(record.max_limit, 0);
    }

    #[test]
    fn update_keeps_partial_state_on_failure() {
        let gateway = MockGateway::new(vec![
            MockDevice::supported("A100", 100_000, 400_000, 250_000)
                .failing_constraints_query(),
        ]);

        let mut record = DeviceRecord::new(0);
        assert!(record.update(&gateway).is_err());

        assert!(record.supported);
        assert_eq!(record.power_limit, 250);
        assert_eq!(record.min_limit, 0);
        assert_eq!(record.max_limit, 0);
    }

    #[test]
    fn serializes_with_wire_names() {
        let record = DeviceRecord {
            index: 1,
            name: "L40S".to_string(),
            power_limit: 300,
            min_limit: 100,
            max_limit: 350,
            power_usage: 42,
            supported: true,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "index": 1,
                "name": "L40S",
                "powerLimit": 300,
                "minLimit": 100,
                "maxLimit": 350,
                "powerUsage": 42,
                "powerManagement": true,
            })
        );
    }
}
