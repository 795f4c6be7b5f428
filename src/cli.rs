use std::collections::BTreeMap;

use crate::{
    controller::Controller,
    dispatcher::{BatchOutcome, PowerLimitRequest},
    errors::PowerError,
};

const HELP: &str = r#"NVIDIA Power Control - Manage power limits for NVIDIA GPUs

Usage:
  Set power limit for all GPUs:
    nvidia-power-control <power_limit_in_watts>

  Set power limit for specific GPUs:
    nvidia-power-control --gpu=0:<power_limit> --gpu=1:<power_limit> ...

  Apply config.json, then optionally run the API server:
    nvidia-power-control [--config <path>]

Examples:
  Set all GPUs to 200 watts:
    nvidia-power-control 200

  Set GPU 0 to 200 watts and GPU 1 to 180 watts:
    nvidia-power-control --gpu=0:200 --gpu=1:180

Config.json format:
  {
    "mode": "all",                   // "all" or "manual"
    "powerLimit": 250,               // Power limit in watts for "all" mode
    "manualLimits": {                // For "manual" mode
      "0": 220,                      // GPU index : power limit in watts
      "1": 180
    },
    "apiKey": "your-secure-api-key", // Required for API server
    "apiPort": 8080,                 // Optional, defaults to 8080
    "startAPIServer": true,          // Whether to start the API server
    "gatewayTimeoutSecs": 10         // Optional, bound on a single GPU call
  }"#;

pub fn print_help() {
    println!("{HELP}");
}

// Where a request was read from, changes how skipped GPUs are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    CommandLine,
    ConfigFile,
}

// One line per requested GPU, by ascending index
pub fn report_lines(
    outcome: &BatchOutcome,
    source: RequestSource,
) -> Vec<String> {
    let mut lines = BTreeMap::new();

    for record in &outcome.updated {
        lines.insert(
            i64::from(record.index),
            format!(
                "GPU {} ({}): Power limit set to {} W",
                record.index, record.name, record.power_limit
            ),
        );
    }

    for (&index, err) in &outcome.failed {
        let line = match err {
            PowerError::IndexOutOfRange { .. } => match source {
                RequestSource::CommandLine => format!("Error: {err}"),
                RequestSource::ConfigFile => format!(
                    "Warning: GPU {index} specified in config doesn't exist"
                ),
            },
            err => format!("GPU {index}: Failed to set power limit: {err}"),
        };
        lines.insert(index, line);
    }

    lines.into_values().collect()
}

/// Apply a request once and print the result of every GPU.
///
/// Only a failure affecting the whole request is returned, per GPU
/// failures are printed and skipped.
pub async fn apply_and_report(
    controller: &Controller,
    request: PowerLimitRequest,
    source: RequestSource,
) -> Result<BatchOutcome, PowerError> {
    let outcome = controller.apply(request).await?;

    for line in report_lines(&outcome, source) {
        println!("{line}");
    }

    Ok(outcome)
}
