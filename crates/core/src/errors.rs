use thiserror::Error;

use crate::{config::ConfigError, jokes::JokeStoreError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("handler failure: {0}")]
    Handler(String),
    #[error("scheduled broadcast skipped: {0}")]
    ScheduleSkip(String),
}

impl ApplicationError {
    /// Only configuration failures stop the process; everything else is
    /// logged and recovered from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Connection(_) => "connection",
            Self::Handler(_) => "handler",
            Self::ScheduleSkip(_) => "schedule_skip",
        }
    }
}

impl From<ConfigError> for ApplicationError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl From<JokeStoreError> for ApplicationError {
    fn from(value: JokeStoreError) -> Self {
        Self::Configuration(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ConfigError;
    use crate::errors::ApplicationError;
    use crate::jokes::JokeStoreError;

    #[test]
    fn configuration_errors_are_the_only_fatal_class() {
        assert!(ApplicationError::Configuration("missing token".to_owned()).is_fatal());
        assert!(!ApplicationError::Connection("socket closed".to_owned()).is_fatal());
        assert!(!ApplicationError::Handler("send failed".to_owned()).is_fatal());
        assert!(!ApplicationError::ScheduleSkip("not seeded".to_owned()).is_fatal());
    }

    #[test]
    fn empty_joke_collection_maps_to_configuration() {
        let error = ApplicationError::from(JokeStoreError::Empty);
        assert_eq!(error.kind(), "configuration");
        assert_eq!(error.to_string(), "configuration failure: joke collection is empty");
    }

    #[test]
    fn config_validation_maps_to_configuration() {
        let error = ApplicationError::from(ConfigError::Validation("slack.bot_token".to_owned()));
        assert!(error.is_fatal());
        assert!(error.to_string().contains("slack.bot_token"));
    }
}
