use std::{collections::BTreeMap, io, path::PathBuf, str::FromStr};

use argparse::{ArgumentParser, Collect, Print, Store, StoreOption};

use crate::config::DEFAULT_CONFIG_PATH;

// A single "--gpu=<index>:<watts>" parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuLimitArg {
    pub index: i64,
    pub watts: u32,
}

impl FromStr for GpuLimitArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, watts) = s.split_once(':').ok_or_else(|| {
            format!("Invalid GPU parameter: {s} (expected --gpu=index:limit)")
        })?;

        let index = index
            .parse()
            .map_err(|_| format!("Invalid GPU index: {index}"))?;
        let watts = watts
            .parse()
            .map_err(|_| format!("Invalid power limit: {watts}"))?;

        Ok(Self { index, watts })
    }
}

// What the process was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    // Same limit in watts on every GPU
    AllGpus(u32),
    // GPU index to limit in watts
    Manual(BTreeMap<i64, u32>),
    // Apply the configuration file, then maybe serve the API
    Config(PathBuf),
}

// Values are kept as given and validated by `invocation()`, so every usage
// error gets the same message and help text
pub struct ArgsOptions {
    pub config_file_path: PathBuf,
    pub watts: Option<String>,
    pub gpu_limits: Vec<String>,
}

impl ArgsOptions {
    pub fn parse() -> Self {
        Self::parse_from(std::env::args().collect())
            .unwrap_or_else(|code| std::process::exit(code))
    }

    // Parse the given arguments, the first one being the program name.
    // On error the usage is printed and the exit code is returned
    pub fn parse_from(args: Vec<String>) -> Result<Self, i32> {
        let mut options = ArgsOptions::default();

        {
            let mut parser = ArgumentParser::new();
            parser.set_description(
                "NVIDIA Power Control - Manage power limits for NVIDIA GPUs",
            );

            // Same limit on every GPU
            parser.refer(&mut options.watts).add_argument(
                "watts",
                StoreOption,
                "Power limit in watts to set on all GPUs",
            );

            // Per GPU limits
            parser.refer(&mut options.gpu_limits).add_option(
                &["-g", "--gpu"],
                Collect,
                "Power limit of a single GPU as <index>:<watts>, can be repeated",
            );

            // Configuration file path
            parser.refer(&mut options.config_file_path).add_option(
                &["-c", "--config"],
                Store,
                "The file path of the configuration file",
            );

            parser.add_option(
                &["-V", "--version"],
                Print(env!("CARGO_PKG_VERSION").to_string()),
                "Show the program version",
            );

            parser.parse(args, &mut io::stdout(), &mut io::stderr())?;
        }

        Ok(options)
    }

    // Decide what to do from the parsed options
    pub fn invocation(&self) -> Result<Invocation, String> {
        match (&self.watts, self.gpu_limits.is_empty()) {
            (Some(_), false) => Err(
                "A global power limit can't be combined with --gpu parameters"
                    .to_string(),
            ),
            (Some(watts), true) => match watts.parse::<u32>() {
                Ok(value) if value > 0 => Ok(Invocation::AllGpus(value)),
                _ => Err(format!(
                    "Invalid power limit: {watts} (must be a positive integer)"
                )),
            },
            (None, false) => {
                let mut limits = BTreeMap::new();
                for arg in &self.gpu_limits {
                    let limit: GpuLimitArg = arg.parse()?;
                    limits.insert(limit.index, limit.watts);
                }

                Ok(Invocation::Manual(limits))
            }
            (None, true) => {
                Ok(Invocation::Config(self.config_file_path.clone()))
            }
        }
    }
}

impl Default for ArgsOptions {
    fn default() -> Self {
        Self {
            config_file_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            watts: None,
            gpu_limits: Vec::new(),
        }
    }
}
