use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    device_record::DeviceRecord, errors::PowerError, gateway::DeviceGateway,
    power_limit::set_power_limit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    // Same limit on every GPU
    All,
    // Per GPU limits
    Manual,
}

impl FromStr for Mode {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Mode::All),
            "manual" => Ok(Mode::Manual),
            other => Err(PowerError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::All => write!(f, "all"),
            Mode::Manual => write!(f, "manual"),
        }
    }
}

// A power limit change request.
// The mode is kept as text so that an unknown mode is reported as such
// and not as a malformed request
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PowerLimitRequest {
    pub mode: String,

    // Used in "all" mode, in watts
    #[serde(alias = "powerLimitWatts")]
    pub power_limit: u32,

    // Used in "manual" mode, GPU index to watts
    pub manual_limits: BTreeMap<i64, u32>,
}

impl PowerLimitRequest {
    pub fn all(watts: u32) -> Self {
        Self {
            mode: Mode::All.to_string(),
            power_limit: watts,
            ..Default::default()
        }
    }

    pub fn manual(limits: BTreeMap<i64, u32>) -> Self {
        Self {
            mode: Mode::Manual.to_string(),
            manual_limits: limits,
            ..Default::default()
        }
    }

    pub fn mode(&self) -> Result<Mode, PowerError> {
        self.mode.parse()
    }
}

// Devices updated by a request and the reason of every skipped one
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub updated: Vec<DeviceRecord>,
    pub failed: BTreeMap<i64, PowerError>,
}

/// Apply a power limit request to the first `device_count` GPUs.
///
/// A failing device is logged, recorded in the outcome and skipped, the
/// other devices are still processed. Manual limits are applied by
/// ascending index. An unknown mode is rejected before any device is
/// touched.
pub fn apply_mode(
    gateway: &mut dyn DeviceGateway,
    request: &PowerLimitRequest,
    device_count: u32,
) -> Result<BatchOutcome, PowerError> {
    let mode = request.mode()?;
    let mut outcome = BatchOutcome::default();

    match mode {
        Mode::All => {
            for index in 0..device_count {
                apply_one(gateway, index, request.power_limit, &mut outcome);
            }
        }
        Mode::Manual => {
            for (&index, &watts) in request.manual_limits.iter() {
                match u32::try_from(index) {
                    Ok(index) if index < device_count => {
                        apply_one(gateway, index, watts, &mut outcome);
                    }
                    _ => {
                        warn!(
                            "GPU {} specified in request doesn't exist",
                            index
                        );
                        outcome.failed.insert(
                            index,
                            PowerError::IndexOutOfRange {
                                index,
                                count: device_count,
                            },
                        );
                    }
                }
            }
        }
    }

    Ok(outcome)
}

fn apply_one(
    gateway: &mut dyn DeviceGateway,
    index: u32,
    watts: u32,
    outcome: &mut BatchOutcome,
) {
    match set_power_limit(gateway, index, watts) {
        Ok(record) => outcome.updated.push(record),
        Err(err) => {
            warn!("GPU {}: Failed to set power limit: {}", index, err);
            outcome.failed.insert(index.into(), err);
        }
    }
}
