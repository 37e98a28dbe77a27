use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wsgw_bridge::error::BridgeError;
use wsgw_bridge::services::{BridgeRunner, HostRuntime};
use wsgw_bridge::config::LoggingConfig;
use wsgw_bridge::Config;

fn init_tracing(logging: &LoggingConfig) {
    let default_filter = if logging.debug {
        "wsgw_bridge=debug"
    } else {
        "wsgw_bridge=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let runtime = HostRuntime::current();

    // Panel tasks get their env from the panel itself
    if runtime.loads_env_file() {
        dotenvy::from_filename("config.env").ok();
    }
    dotenvy::dotenv().ok();

    init_tracing(&LoggingConfig::from_env());

    // Load configuration
    let config = Config::from_env()?;
    info!("Run mode: {}", runtime.name());

    let runner = BridgeRunner::from_config(config, runtime).await?;

    match runner.run().await {
        Ok(summary) => {
            if summary.relogged_in {
                info!("Run recovered with a fresh login");
            }
            info!("✅ Done, {} meters processed", summary.meters.len());
            Ok(())
        }
        Err(BridgeError::CredentialsMissing) => {
            warn!("❌ Account not configured");
            warn!("Standalone: copy config.env.example to config.env and fill it in");
            warn!("Qinglong: set the WSGW_USERNAME and WSGW_PASSWORD environment variables");
            std::process::exit(1);
        }
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(1);
        }
    }
}
