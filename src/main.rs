use alert_relay::config::{Config, RelayConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "alert_relay")]
#[command(about = "Relay a live alert feed into a group chat", long_about = None)]
struct Args {
    /// Verbose output (-v, -vv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Settings file (default: ~/.alert-relay/config.toml)
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let verbosity = args.verbose.min(3);
    Config::ensure_log_directory().ok();
    alert_relay::init_tracing(verbosity, Some(Config::log_file_path()));
    info!(
        "alert_relay {} (built {})",
        Config::version(),
        Config::build_date()
    );

    let config_path = args.config.unwrap_or_else(Config::config_file_path);
    let config = match RelayConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("Config: {}", e);
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(alert_relay::run(config)) {
        error!("Relay stopped: {:#}", e);
        std::process::exit(1);
    }
}
