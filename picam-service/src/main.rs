//! picam-service
//!
//! Runs the camera daemon directly, without checking for a running
//! instance first. `picamctl` is the usual entry point.

use clap::Parser;
use picam_common::ControlArgs;
use picam_service::error::ServiceError;
use tracing::{error, info};

/// picam camera streaming daemon
#[derive(Parser, Debug)]
#[command(name = "picam-service")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: ControlArgs,
}

fn main() {
    let cli = Cli::parse();

    let (config, source) = picam_service::config::load_config();
    let _guard = picam_service::logging::init_tracing(config.file_logging);
    source.log();

    match picam_service::run(&cli.args, &config) {
        Ok(()) => info!("picam service stopped"),
        Err(e @ ServiceError::InvalidArguments(_)) => {
            error!("{}", e);
            std::process::exit(2);
        }
        Err(e) => {
            error!("picam service failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }
}
