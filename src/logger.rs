use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Log to stderr, standard output is kept for the CLI messages
pub fn init_logging() {
    let level = if cfg!(debug_assertions) { "trace" } else { "info" };

    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(f) => (f, true),
        Err(_) => (EnvFilter::new(level), false),
    };

    let fmt_layer = fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    if !from_env {
        info!("\"RUST_LOG\" variable not set, defaulting to {level}");
    }
}
