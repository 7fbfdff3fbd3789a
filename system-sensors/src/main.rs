//! System Sensors agent binary
//!
//! Usage: `system-sensors <settings.yaml>`

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use system_sensors::{lifecycle, logging, Settings};
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "system-sensors", version, about = "Publish host sensors to MQTT for Home Assistant")]
struct Cli {
    /// Path to the settings file
    settings: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let settings = match Settings::load(&cli.settings).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match lifecycle::run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
