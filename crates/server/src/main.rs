mod bootstrap;
mod health;

use anyhow::Result;
use jokebot_core::config::{AppConfig, LoadOptions};
use tracing::warn;

use crate::health::HealthState;

fn init_logging(config: &AppConfig) {
    use jokebot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        HealthState::new(app.bot.membership(), app.bot.connection_state()),
    )
    .await?;

    tracing::info!(
        event_name = "system.server.transport_mode",
        transport_mode = app.transport_mode,
        correlation_id = "bootstrap",
        "real-time transport initialized"
    );
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "jokebot-server started"
    );

    app.bot.run(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "jokebot-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
    }
}
