use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Log to stderr so stdout stays clean for JSON and listings.
pub fn init(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "cadventory=debug,info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbose > 1))
        .with(filter)
        .init();
}
