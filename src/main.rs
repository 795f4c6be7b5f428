use std::{path::Path, process};

use anyhow::{Context, Result};
use nvidia_power_control::{
    api::{self, ApiState},
    arg_parser::{ArgsOptions, Invocation},
    cli::{self, RequestSource},
    config::Config,
    controller::Controller,
    dispatcher::{Mode, PowerLimitRequest},
    errors::PowerError,
    gateway::NvmlGateway,
    logger,
};
use tokio::signal::ctrl_c;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logging();

    // Parse the command line arguments
    let args_options = ArgsOptions::parse();
    let invocation = args_options.invocation().unwrap_or_else(|msg| {
        println!("{msg}");
        cli::print_help();
        process::exit(1);
    });

    // The configuration is only read when no limit was given
    // on the command line
    let config = match &invocation {
        Invocation::Config(path) => load_config_or_exit(path),
        _ => Config::default(),
    };

    // A single NVML session is shared by every surface
    let gateway =
        NvmlGateway::init().with_context(|| "Failed to initialize NVML")?;
    let controller =
        Controller::new(Box::new(gateway), config.gateway_timeout());

    match invocation {
        Invocation::AllGpus(watts) => {
            println!("Setting all GPUs to {watts} watts");
            cli::apply_and_report(
                &controller,
                PowerLimitRequest::all(watts),
                RequestSource::CommandLine,
            )
            .await
            .with_context(|| "Failed to set power limits")?;
        }
        Invocation::Manual(limits) => {
            cli::apply_and_report(
                &controller,
                PowerLimitRequest::manual(limits),
                RequestSource::CommandLine,
            )
            .await
            .with_context(|| "Failed to set power limits")?;
        }
        Invocation::Config(path) => {
            run_from_config(controller, &config, &path).await?;
        }
    }

    Ok(())
}

fn load_config_or_exit(path: &Path) -> Config {
    match Config::load(path) {
        Ok(config) => config,
        Err(err) => {
            for e in anyhow::Error::from(err).chain() {
                error!("{e}");
            }
            println!(
                "No command line arguments and no usable {}.",
                path.display()
            );
            println!(
                "Either provide command line arguments or create a config file."
            );
            cli::print_help();
            process::exit(1);
        }
    }
}

// Apply the configured limits once, then serve the API if requested
async fn run_from_config(
    controller: Controller,
    config: &Config,
    path: &Path,
) -> Result<()> {
    println!("Applying power settings from {}", path.display());

    let request = config.power_request();
    if let Ok(Mode::All) = request.mode() {
        println!("Setting all GPUs to {} watts", request.power_limit);
    }

    match cli::apply_and_report(&controller, request, RequestSource::ConfigFile)
        .await
    {
        Ok(_) => {}
        Err(PowerError::InvalidMode(mode)) => {
            println!(
                "Invalid mode in config: {mode} (must be 'all' or 'manual')"
            );
        }
        Err(err) => {
            return Err(err).with_context(|| "Failed to apply config settings");
        }
    }

    if !config.start_api_server {
        println!("Applied settings from {}, exiting", path.display());
        return Ok(());
    }

    if config.api_key.is_empty() {
        println!("Error: API key is required to start API server");
        println!(
            "Please add 'apiKey' field to your config file or set 'startAPIServer' to false"
        );
        process::exit(1);
    }

    // Populate the cache before accepting requests
    let records = controller
        .refresh()
        .await
        .with_context(|| "Failed to initialize GPU cache")?;
    info!("GPU cache initialized with {} devices", records.len());

    // Cancel the token on Ctrl-C to stop the server gracefully
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(err) = ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {err}");
                return;
            }

            info!("Shutting down API server");
            token.cancel();
        });
    }

    println!("Starting API server mode");
    api::serve(
        ApiState::new(controller, &config.api_key),
        config.api_port(),
        token,
    )
    .await
    .with_context(|| "API server failed")
}
