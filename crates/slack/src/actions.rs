use std::sync::Arc;

use async_trait::async_trait;
use jokebot_core::ApplicationError;
use serde::Serialize;
use tracing::{debug, warn};

use crate::events::EventContext;
use crate::images::ImageSearch;
use crate::router::{Action, ReplyTarget, RoutedAction};
use crate::socket::TransportError;

/// Display identity used instead of the authenticated bot user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayOptions {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub as_user: bool,
}

impl DisplayOptions {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into(), icon_emoji: None, icon_url: None, as_user: false }
    }

    pub fn icon_emoji(mut self, icon_emoji: impl Into<String>) -> Self {
        self.icon_emoji = Some(icon_emoji.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    #[serde(rename = "channel")]
    pub channel_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(flatten)]
    pub display: Option<DisplayOptions>,
}

impl OutboundMessage {
    pub fn to(channel_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { channel_id: channel_id.into(), text: text.into(), thread_ts: None, display: None }
    }

    /// Same channel and thread as the triggering message.
    pub fn reply_to(target: &ReplyTarget, text: impl Into<String>) -> Self {
        Self {
            channel_id: target.channel_id.clone(),
            text: text.into(),
            thread_ts: target.thread_ts.clone(),
            display: None,
        }
    }

    pub fn with_display(mut self, display: DisplayOptions) -> Self {
        self.display = Some(display);
        self
    }
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError>;
}

pub struct ActionExecutor {
    sender: Arc<dyn MessageSender>,
    images: Option<Arc<dyn ImageSearch>>,
    image_display: DisplayOptions,
}

impl ActionExecutor {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        images: Option<Arc<dyn ImageSearch>>,
        image_display: DisplayOptions,
    ) -> Self {
        Self { sender, images, image_display }
    }

    /// Performs the sends for one routed action, in order, stopping at the
    /// first failure. Returns the number of messages delivered.
    pub async fn execute(
        &self,
        routed: RoutedAction,
        ctx: &EventContext,
    ) -> Result<usize, ApplicationError> {
        let target = &routed.target;
        let sent = match routed.action {
            Action::Reply(text) => {
                self.reply(target, text).await?;
                1
            }
            Action::Conversation(lines) => {
                let mut sent = 0;
                for line in lines {
                    self.reply(target, line).await?;
                    sent += 1;
                }
                sent
            }
            Action::ImageSearch { query, acknowledgment } => {
                let mut sent = 0;
                if let Some(acknowledgment) = acknowledgment {
                    self.reply(target, acknowledgment).await?;
                    sent += 1;
                }
                self.post_image(target, &query).await?;
                sent + 1
            }
        };

        debug!(
            event_name = "action.executed",
            correlation_id = %ctx.correlation_id,
            channel_id = %target.channel_id,
            intent = routed.intent.as_str(),
            sent,
            "routed action delivered"
        );
        Ok(sent)
    }

    async fn reply(&self, target: &ReplyTarget, text: String) -> Result<(), ApplicationError> {
        self.sender
            .send(OutboundMessage::reply_to(target, text))
            .await
            .map_err(|error| ApplicationError::Handler(error.to_string()))
    }

    async fn post_image(&self, target: &ReplyTarget, query: &str) -> Result<(), ApplicationError> {
        let Some(images) = &self.images else {
            return Err(ApplicationError::Handler("image search is not configured".to_owned()));
        };

        match images.search(query).await {
            Ok(Some(url)) => {
                let mut message = OutboundMessage::to(target.channel_id.clone(), url)
                    .with_display(self.image_display.clone());
                message.thread_ts = target.thread_ts.clone();
                self.sender
                    .send(message)
                    .await
                    .map_err(|error| ApplicationError::Handler(error.to_string()))
            }
            Ok(None) => self.reply(target, format!("I couldn't find a GIF for `{query}`.")).await,
            Err(error) => {
                warn!(
                    event_name = "action.image_search_failed",
                    channel_id = %target.channel_id,
                    error = %error,
                    "image lookup failed"
                );
                Err(ApplicationError::Handler(error.to_string()))
            }
        }
    }
}
