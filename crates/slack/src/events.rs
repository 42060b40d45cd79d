use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use jokebot_core::{BotIdentity, Destination, DestinationKind, MembershipTracker, MessageScope};
use thiserror::Error;
use tracing::{debug, info};

use crate::router::{PatternRouter, RoutedAction};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    Message(InboundMessage),
    ChannelJoined(Destination),
    ChannelLeft { channel_id: String },
    GroupJoined(Destination),
    GroupLeft { channel_id: String },
    MemberJoined { channel_id: String, user_id: String, kind: DestinationKind },
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::Message(_) => SlackEventType::Message,
            Self::ChannelJoined(_) => SlackEventType::ChannelJoined,
            Self::ChannelLeft { .. } => SlackEventType::ChannelLeft,
            Self::GroupJoined(_) => SlackEventType::GroupJoined,
            Self::GroupLeft { .. } => SlackEventType::GroupLeft,
            Self::MemberJoined { .. } => SlackEventType::MemberJoined,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::Message(message) => Some(&message.channel_id),
            Self::ChannelJoined(destination) | Self::GroupJoined(destination) => {
                Some(&destination.id)
            }
            Self::ChannelLeft { channel_id }
            | Self::GroupLeft { channel_id }
            | Self::MemberJoined { channel_id, .. } => Some(channel_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    Message,
    ChannelJoined,
    ChannelLeft,
    GroupJoined,
    GroupLeft,
    MemberJoined,
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel_id: String,
    pub user_id: Option<String>,
    pub text: String,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

/// A message that survived filtering, with its scope resolved against the
/// bot identity and any leading mention stripped from `text`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopedMessage {
    pub channel_id: String,
    pub user_id: Option<String>,
    pub text: String,
    pub scope: MessageScope,
    pub thread_ts: Option<String>,
}

pub fn classify_message(message: &InboundMessage, identity: &BotIdentity) -> Option<ScopedMessage> {
    if message.subtype.is_some() || message.bot_id.is_some() {
        return None;
    }
    if message.user_id.as_deref() == Some(identity.id.as_str()) {
        return None;
    }

    let leading = strip_leading_mention(&message.text, &identity.id);
    let (scope, text) = if message.channel_id.starts_with('D') {
        (MessageScope::DirectMessage, leading.unwrap_or(&message.text))
    } else if let Some(rest) = leading {
        (MessageScope::DirectMention, rest)
    } else if mentions_bot(&message.text, &identity.id) {
        (MessageScope::Mention, message.text.as_str())
    } else {
        (MessageScope::Ambient, message.text.as_str())
    };

    Some(ScopedMessage {
        channel_id: message.channel_id.clone(),
        user_id: message.user_id.clone().filter(|user| !user.trim().is_empty()),
        text: text.trim().to_owned(),
        scope,
        thread_ts: message.thread_ts.clone(),
    })
}

/// True when `text` holds a closed `<@BOT>` or `<@BOT|name>` token anywhere.
fn mentions_bot(text: &str, bot_id: &str) -> bool {
    let opening = format!("<@{bot_id}");
    text.match_indices(&opening)
        .any(|(start, _)| matches!(text[start + opening.len()..].chars().next(), Some('>' | '|')))
}

/// Strips `<@BOT>` or `<@BOT|name>` plus a trailing `:`/`,` from the start.
fn strip_leading_mention<'a>(text: &'a str, bot_id: &str) -> Option<&'a str> {
    let rest = text.trim_start().strip_prefix("<@")?.strip_prefix(bot_id)?;
    let rest = match rest.strip_prefix('>') {
        Some(rest) => rest,
        None => {
            let label = rest.strip_prefix('|')?;
            let close = label.find('>')?;
            &label[close + 1..]
        }
    };
    Some(rest.trim_start().trim_start_matches([':', ',']).trim_start())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(RoutedAction),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("malformed {event_type:?} event: {reason}")]
    Malformed { event_type: SlackEventType, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_types(&self) -> &'static [SlackEventType];
    async fn handle(
        &self,
        event: &SlackEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for each of its event types, replacing any
    /// handler previously registered for the same type.
    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        for event_type in handler.event_types() {
            self.handlers.insert(*event_type, Arc::clone(&handler));
        }
    }

    pub async fn dispatch(
        &self,
        event: &SlackEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(event, ctx).await.map_err(DispatchError::from)
    }

    pub fn route_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn handles(&self, event_type: SlackEventType) -> bool {
        self.handlers.contains_key(&event_type)
    }
}

/// Builds the handler set for one connection.
pub fn session_dispatcher(
    identity: BotIdentity,
    router: Arc<PatternRouter>,
    membership: Arc<MembershipTracker>,
) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MessageHandler::new(router, identity.clone()));
    dispatcher.register(MembershipHandler::new(membership, identity));
    dispatcher
}

pub struct MessageHandler {
    router: Arc<PatternRouter>,
    identity: BotIdentity,
}

impl MessageHandler {
    pub fn new(router: Arc<PatternRouter>, identity: BotIdentity) -> Self {
        Self { router, identity }
    }
}

#[async_trait]
impl EventHandler for MessageHandler {
    fn event_types(&self) -> &'static [SlackEventType] {
        &[SlackEventType::Message]
    }

    async fn handle(
        &self,
        event: &SlackEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::Message(message) = event else {
            return Ok(HandlerResult::Ignored);
        };
        let Some(scoped) = classify_message(message, &self.identity) else {
            return Ok(HandlerResult::Ignored);
        };

        match self.router.route(&scoped, &self.identity) {
            Some(action) => {
                debug!(
                    event_name = "router.intent_matched",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %scoped.channel_id,
                    scope = scoped.scope.as_str(),
                    intent = action.intent.as_str(),
                    "message matched intent"
                );
                Ok(HandlerResult::Responded(action))
            }
            None => Ok(HandlerResult::Processed),
        }
    }
}

pub struct MembershipHandler {
    membership: Arc<MembershipTracker>,
    identity: BotIdentity,
}

impl MembershipHandler {
    pub fn new(membership: Arc<MembershipTracker>, identity: BotIdentity) -> Self {
        Self { membership, identity }
    }

    fn join(&self, kind: DestinationKind, mut destination: Destination) -> bool {
        // A join event means the bot now belongs to the destination.
        match kind {
            DestinationKind::Channel => destination.bot_is_member = true,
            DestinationKind::Group => {
                destination.members.insert(self.identity.id.clone());
            }
        }
        self.membership.add(kind, destination)
    }
}

#[async_trait]
impl EventHandler for MembershipHandler {
    fn event_types(&self) -> &'static [SlackEventType] {
        &[
            SlackEventType::ChannelJoined,
            SlackEventType::ChannelLeft,
            SlackEventType::GroupJoined,
            SlackEventType::GroupLeft,
            SlackEventType::MemberJoined,
        ]
    }

    async fn handle(
        &self,
        event: &SlackEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        if event.channel_id().map(str::trim).unwrap_or_default().is_empty() {
            return Err(EventHandlerError::Malformed {
                event_type: event.event_type(),
                reason: "missing channel id".to_owned(),
            });
        }

        let (kind, joined, changed) = match event {
            SlackEvent::ChannelJoined(destination) => (
                DestinationKind::Channel,
                true,
                self.join(DestinationKind::Channel, destination.clone()),
            ),
            SlackEvent::GroupJoined(destination) => (
                DestinationKind::Group,
                true,
                self.join(DestinationKind::Group, destination.clone()),
            ),
            SlackEvent::ChannelLeft { channel_id } => {
                (DestinationKind::Channel, false, self.membership.remove_channel(channel_id))
            }
            SlackEvent::GroupLeft { channel_id } => {
                (DestinationKind::Group, false, self.membership.remove_group(channel_id))
            }
            SlackEvent::MemberJoined { channel_id, user_id, kind } => {
                if user_id != &self.identity.id {
                    return Ok(HandlerResult::Ignored);
                }
                let destination = match kind {
                    DestinationKind::Channel => Destination::channel(channel_id.clone()),
                    DestinationKind::Group => {
                        Destination::group(channel_id.clone(), Vec::<String>::new())
                    }
                };
                (*kind, true, self.join(*kind, destination))
            }
            SlackEvent::Message(_) | SlackEvent::Unsupported { .. } => {
                return Ok(HandlerResult::Ignored);
            }
        };

        let event_name = if joined { "membership.joined" } else { "membership.left" };
        info!(
            event_name,
            correlation_id = %ctx.correlation_id,
            channel_id = event.channel_id().unwrap_or("unknown"),
            kind = kind.as_str(),
            changed,
            "membership event applied"
        );
        Ok(HandlerResult::Processed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jokebot_core::{
        BotIdentity, Destination, DestinationKind, JokeStore, MembershipTracker, MessageScope,
    };

    use super::{
        classify_message, session_dispatcher, EventContext, EventDispatcher, EventHandlerError,
        HandlerResult, InboundMessage, SlackEvent, SlackEventType,
    };
    use crate::router::{Action, Intent, PatternRouter, RouterOptions};

    fn identity() -> BotIdentity {
        BotIdentity::new("B1", "jokebot")
    }

    fn message(channel_id: &str, user_id: Option<&str>, text: &str) -> InboundMessage {
        InboundMessage {
            channel_id: channel_id.to_owned(),
            user_id: user_id.map(str::to_owned),
            text: text.to_owned(),
            ..InboundMessage::default()
        }
    }

    fn fixture() -> (EventDispatcher, Arc<MembershipTracker>) {
        let jokes = Arc::new(JokeStore::new(vec!["the only joke".to_owned()]).expect("jokes"));
        let router =
            Arc::new(PatternRouter::standard(jokes, RouterOptions::default()).expect("router"));
        let membership = Arc::new(MembershipTracker::new());
        membership.seed(
            "B1",
            vec![Destination::channel("C1")],
            vec![Destination::group("G1", ["B1"])],
        );
        (session_dispatcher(identity(), router, Arc::clone(&membership)), membership)
    }

    #[test]
    fn classifies_scopes_against_bot_identity() {
        let identity = identity();

        let dm = classify_message(&message("D1", Some("U1"), "hello"), &identity).expect("dm");
        assert_eq!(dm.scope, MessageScope::DirectMessage);

        let direct =
            classify_message(&message("C1", Some("U1"), "<@B1>: tell me a joke"), &identity)
                .expect("direct mention");
        assert_eq!(direct.scope, MessageScope::DirectMention);
        assert_eq!(direct.text, "tell me a joke");

        let labelled =
            classify_message(&message("C1", Some("U1"), "<@B1|jokebot> help"), &identity)
                .expect("labelled mention");
        assert_eq!(labelled.scope, MessageScope::DirectMention);
        assert_eq!(labelled.text, "help");

        let mention = classify_message(&message("C1", Some("U1"), "thanks <@B1>!"), &identity)
            .expect("mention");
        assert_eq!(mention.scope, MessageScope::Mention);

        let ambient =
            classify_message(&message("C1", Some("U1"), "lunch?"), &identity).expect("ambient");
        assert_eq!(ambient.scope, MessageScope::Ambient);
    }

    #[test]
    fn mention_of_longer_id_sharing_the_bot_prefix_is_ambient() {
        let identity = identity();

        for text in ["hello <@B12>", "<@B12> tell me a joke", "ping <@B1X|other>"] {
            let scoped =
                classify_message(&message("C1", Some("U1"), text), &identity).expect("message");
            assert_eq!(scoped.scope, MessageScope::Ambient, "{text}");
        }

        let text = "hi <@B12> and <@B1|jokebot>";
        let labelled =
            classify_message(&message("C1", Some("U1"), text), &identity).expect("labelled");
        assert_eq!(labelled.scope, MessageScope::Mention);
    }

    #[test]
    fn skips_own_bot_and_subtyped_messages() {
        let identity = identity();
        assert!(classify_message(&message("D1", Some("B1"), "hello"), &identity).is_none());

        let mut from_bot = message("D1", None, "hello");
        from_bot.bot_id = Some("BOTHER".to_owned());
        assert!(classify_message(&from_bot, &identity).is_none());

        let mut edited = message("D1", Some("U1"), "hello");
        edited.subtype = Some("message_changed".to_owned());
        assert!(classify_message(&edited, &identity).is_none());
    }

    #[test]
    fn session_dispatcher_covers_message_and_membership_events() {
        let (dispatcher, _) = fixture();
        assert_eq!(dispatcher.route_count(), 6);
        assert!(dispatcher.handles(SlackEventType::Message));
        assert!(dispatcher.handles(SlackEventType::MemberJoined));
        assert!(!dispatcher.handles(SlackEventType::Unsupported));
    }

    #[tokio::test]
    async fn dispatcher_routes_greeting_to_salutation() {
        let (dispatcher, _) = fixture();
        let event = SlackEvent::Message(message("D1", Some("U1"), "hello"));

        let result = dispatcher.dispatch(&event, &EventContext::default()).await.expect("dispatch");

        let HandlerResult::Responded(action) = result else {
            panic!("expected a response, got {result:?}");
        };
        assert_eq!(action.intent, Intent::Salutation);
        assert!(matches!(action.action, Action::Reply(ref text) if text.contains("<@U1>")));
    }

    #[tokio::test]
    async fn dispatcher_marks_unmatched_messages_processed() {
        let (dispatcher, _) = fixture();
        let event = SlackEvent::Message(message("C1", Some("U1"), "random channel banter"));

        let result = dispatcher.dispatch(&event, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();
        let event = SlackEvent::Unsupported { event_type: "pong".to_owned() };

        let result = dispatcher.dispatch(&event, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }

    #[tokio::test]
    async fn membership_events_update_tracker() {
        let (dispatcher, membership) = fixture();
        let ctx = EventContext::default();

        let joined = SlackEvent::ChannelJoined(Destination::channel("C2").bot_is_member(false));
        dispatcher.dispatch(&joined, &ctx).await.expect("channel joined");
        dispatcher
            .dispatch(&SlackEvent::GroupJoined(Destination::group("G2", ["U1"])), &ctx)
            .await
            .expect("group joined");
        dispatcher
            .dispatch(&SlackEvent::ChannelLeft { channel_id: "C1".to_owned() }, &ctx)
            .await
            .expect("channel left");
        dispatcher
            .dispatch(&SlackEvent::GroupLeft { channel_id: "G1".to_owned() }, &ctx)
            .await
            .expect("group left");

        let snapshot = membership.snapshot().expect("seeded");
        assert!(snapshot.contains(DestinationKind::Channel, "C2"));
        assert!(snapshot.contains(DestinationKind::Group, "G2"));
        assert!(!snapshot.contains(DestinationKind::Channel, "C1"));
        assert!(!snapshot.contains(DestinationKind::Group, "G1"));
    }

    #[tokio::test]
    async fn member_joined_only_tracks_the_bot_itself() {
        let (dispatcher, membership) = fixture();
        let ctx = EventContext::default();

        let other = SlackEvent::MemberJoined {
            channel_id: "C7".to_owned(),
            user_id: "U1".to_owned(),
            kind: DestinationKind::Channel,
        };
        let result = dispatcher.dispatch(&other, &ctx).await.expect("dispatch");
        assert_eq!(result, HandlerResult::Ignored);

        let bot = SlackEvent::MemberJoined {
            channel_id: "G7".to_owned(),
            user_id: "B1".to_owned(),
            kind: DestinationKind::Group,
        };
        let result = dispatcher.dispatch(&bot, &ctx).await.expect("dispatch");
        assert_eq!(result, HandlerResult::Processed);

        let snapshot = membership.snapshot().expect("seeded");
        assert!(!snapshot.contains(DestinationKind::Channel, "C7"));
        assert!(snapshot.contains(DestinationKind::Group, "G7"));
    }

    #[tokio::test]
    async fn membership_event_without_channel_id_is_rejected() {
        let (dispatcher, _) = fixture();
        let event = SlackEvent::ChannelLeft { channel_id: " ".to_owned() };

        let error = dispatcher.dispatch(&event, &EventContext::default()).await.err();

        assert!(matches!(
            error,
            Some(super::DispatchError::Handler(EventHandlerError::Malformed {
                event_type: SlackEventType::ChannelLeft,
                ..
            }))
        ));
    }
}
