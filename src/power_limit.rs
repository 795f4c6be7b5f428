use tracing::{debug, info};

use crate::{
    device_record::{DeviceRecord, MILLIWATTS_PER_WATT, to_watts},
    errors::PowerError,
    gateway::{DeviceGateway, PowerConstraints},
};

// Result of fitting a requested limit into the device constraints,
// all values in milliwatts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClampedLimit {
    Within(u32),
    RaisedToMin(u32),
    LoweredToMax(u32),
}

impl ClampedLimit {
    pub fn milliwatts(self) -> u32 {
        match self {
            ClampedLimit::Within(limit)
            | ClampedLimit::RaisedToMin(limit)
            | ClampedLimit::LoweredToMax(limit) => limit,
        }
    }
}

pub fn clamp_limit(
    requested: u32,
    constraints: PowerConstraints,
) -> ClampedLimit {
    if requested < constraints.min_limit {
        ClampedLimit::RaisedToMin(constraints.min_limit)
    } else if requested > constraints.max_limit {
        ClampedLimit::LoweredToMax(constraints.max_limit)
    } else {
        ClampedLimit::Within(requested)
    }
}

/// Set the power limit of a single GPU.
///
/// The requested value is never rejected for being out of range, it is
/// clamped into the constraints reported by the driver. The returned
/// record is read back from the device after the write.
pub fn set_power_limit(
    gateway: &mut dyn DeviceGateway,
    index: u32,
    watts: u32,
) -> Result<DeviceRecord, PowerError> {
    if !gateway.is_power_management_supported(index)? {
        return Err(PowerError::UnsupportedOperation(index));
    }

    let constraints = gateway.power_limit_constraints(index)?;

    let requested = watts.saturating_mul(MILLIWATTS_PER_WATT);
    let clamped = clamp_limit(requested, constraints);

    match clamped {
        ClampedLimit::RaisedToMin(limit) => info!(
            "GPU {}: Desired limit {} W below minimum {} W, setting to {} W",
            index,
            watts,
            to_watts(constraints.min_limit),
            to_watts(limit)
        ),
        ClampedLimit::LoweredToMax(limit) => info!(
            "GPU {}: Desired limit {} W above maximum {} W, setting to {} W",
            index,
            watts,
            to_watts(constraints.max_limit),
            to_watts(limit)
        ),
        ClampedLimit::Within(_) => {}
    }

    gateway.set_power_limit(index, clamped.milliwatts())?;
    debug!("GPU {}: Power limit written: {} mW", index, clamped.milliwatts());

    let mut record = DeviceRecord::new(index);
    record.update(gateway)?;

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        GatewayError,
        mock_gateway::{MockDevice, MockGateway},
    };

    const BOUNDS: PowerConstraints = PowerConstraints {
        min_limit: 100_000,
        max_limit: 350_000,
    };

    fn gateway() -> MockGateway {
        MockGateway::new(vec![MockDevice::supported(
            "RTX 3090", 100_000, 350_000, 350_000,
        )])
    }

    #[test]
    fn clamp_keeps_values_in_range() {
        for requested in [0, 99_999, 100_000, 220_000, 350_000, 350_001, u32::MAX]
        {
            let limit = clamp_limit(requested, BOUNDS).milliwatts();
            assert!((BOUNDS.min_limit..=BOUNDS.max_limit).contains(&limit));
        }

        assert_eq!(
            clamp_limit(50_000, BOUNDS),
            ClampedLimit::RaisedToMin(100_000)
        );
        assert_eq!(
            clamp_limit(400_000, BOUNDS),
            ClampedLimit::LoweredToMax(350_000)
        );
        assert_eq!(clamp_limit(200_000, BOUNDS), ClampedLimit::Within(200_000));
    }

    #[test]
    fn set_within_range_writes_exact_value() {
        let mut gateway = gateway();
        let log = gateway.log();

        let record = set_power_limit(&mut gateway, 0, 220).unwrap();

        assert_eq!(log.writes(), vec![(0, 220_000)]);
        assert_eq!(record.power_limit, 220);
        assert_eq!((record.min_limit, record.max_limit), (100, 350));
    }

    #[test]
    fn set_below_minimum_is_raised() {
        let mut gateway = gateway();
        let log = gateway.log();

        let record = set_power_limit(&mut gateway, 0, 10).unwrap();

        assert_eq!(log.writes(), vec![(0, 100_000)]);
        assert_eq!(record.power_limit, 100);
    }

    #[test]
    fn set_above_maximum_is_lowered() {
        let mut gateway = gateway();
        let log = gateway.log();

        // Would overflow a plain u32 multiplication
        let record = set_power_limit(&mut gateway, 0, 5_000_000).unwrap();

        assert_eq!(log.writes(), vec![(0, 350_000)]);
        assert_eq!(record.power_limit, 350);
    }

    #[test]
    fn repeated_set_does_not_drift() {
        let mut gateway = gateway();

        let first = set_power_limit(&mut gateway, 0, 275).unwrap();
        let second = set_power_limit(&mut gateway, 0, 275).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn unsupported_device_is_never_written() {
        let mut gateway = MockGateway::new(vec![MockDevice::unsupported("GT 710")]);
        let log = gateway.log();

        let err = set_power_limit(&mut gateway, 0, 30).unwrap_err();

        assert!(matches!(err, PowerError::UnsupportedOperation(0)));
        assert!(log.writes().is_empty());
    }

    #[test]
    fn unreadable_constraints_abort_before_write() {
        let mut gateway = MockGateway::new(vec![
            MockDevice::supported("A10", 100_000, 150_000, 150_000)
                .failing_constraints_query(),
        ]);
        let log = gateway.log();

        let err = set_power_limit(&mut gateway, 0, 120).unwrap_err();

        assert!(matches!(err, PowerError::Gateway(GatewayError::Other(_))));
        assert!(log.writes().is_empty());
    }

    #[test]
    fn rejected_write_is_reported() {
        let mut gateway = MockGateway::new(vec![
            MockDevice::supported("A10", 100_000, 150_000, 150_000)
                .failing_writes(),
        ]);

        let err = set_power_limit(&mut gateway, 0, 120).unwrap_err();
        assert!(matches!(err, PowerError::Gateway(_)));
    }

    #[test]
    fn missing_device_is_not_found() {
        let mut gateway = gateway();

        let err = set_power_limit(&mut gateway, 4, 200).unwrap_err();
        assert!(matches!(
            err,
            PowerError::Gateway(GatewayError::DeviceNotFound(4))
        ));
    }
}
