use std::sync::Arc;

use jokebot_core::config::{AppConfig, ConfigError};
use jokebot_core::ApplicationError;
use jokebot_slack::actions::DisplayOptions;
use jokebot_slack::bot::{BotCore, BotSettings};
use jokebot_slack::images::{GiphyClient, ImageSearch, ImageSearchError};
use jokebot_slack::socket::{NoopRtmTransport, ReconnectPolicy};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub bot: BotCore,
    pub transport_mode: &'static str,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bot construction failed: {0}")]
    Bot(#[from] ApplicationError),
    #[error("image search client could not be built: {0}")]
    Images(#[from] ImageSearchError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let jokes = config.jokes.load_store()?;
    info!(
        event_name = "system.bootstrap.jokes_loaded",
        correlation_id = "bootstrap",
        jokes = jokes.len(),
        source = if config.jokes.path.is_some() { "file" } else { "bundled" },
        "joke collection loaded"
    );

    let images = config
        .giphy
        .enabled_key()
        .map(|api_key| GiphyClient::new(api_key.clone(), config.giphy.rating.clone()))
        .transpose()?
        .map(|client| Arc::new(client) as Arc<dyn ImageSearch>);
    info!(
        event_name = "system.bootstrap.image_search",
        correlation_id = "bootstrap",
        enabled = images.is_some(),
        "image search configured"
    );

    let mut display = DisplayOptions::new(config.broadcast.username.clone());
    if let Some(icon_emoji) = &config.broadcast.icon_emoji {
        display = display.icon_emoji(icon_emoji.clone());
    }

    let settings = BotSettings {
        token: config.slack.bot_token.clone(),
        jokes,
        broadcast_at: config.broadcast.enabled.then_some(config.broadcast.time),
        display,
        reconnect_policy: ReconnectPolicy::default(),
    };
    let bot = BotCore::new(settings, Arc::new(NoopRtmTransport::default()), images)?;

    Ok(Application { config, bot, transport_mode: "noop" })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use jokebot_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use jokebot_slack::router::Intent;

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};

    fn config(overrides: ConfigOverrides) -> AppConfig {
        AppConfig::load(LoadOptions { overrides, ..LoadOptions::default() }).expect("config")
    }

    fn with_token() -> ConfigOverrides {
        ConfigOverrides {
            slack_bot_token: Some("xoxb-test".to_string()),
            giphy_api_key: Some(String::new()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn bootstrap_wires_bot_from_bundled_jokes() {
        let app = bootstrap_with_config(config(with_token())).expect("bootstrap");

        assert_eq!(app.transport_mode, "noop");
        assert!(app.bot.broadcaster().is_some());
        assert!(!app.bot.router().intents().any(|intent| intent == Intent::Image));
        assert!(!app.bot.membership().is_seeded());
    }

    #[test]
    fn giphy_key_enables_image_intent_and_disabled_broadcast_is_skipped() {
        let app = bootstrap_with_config(config(ConfigOverrides {
            giphy_api_key: Some("giphy-key".to_string()),
            broadcast_enabled: Some(false),
            ..with_token()
        }))
        .expect("bootstrap");

        assert!(app.bot.router().intents().any(|intent| intent == Intent::Image));
        assert!(app.bot.broadcaster().is_none());
    }

    #[test]
    fn empty_joke_file_fails_bootstrap() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "# nothing but comments").expect("write");

        let result = bootstrap_with_config(config(ConfigOverrides {
            jokes_path: Some(file.path().to_path_buf()),
            ..with_token()
        }));

        assert!(matches!(result, Err(BootstrapError::Config(_))));
    }
}
