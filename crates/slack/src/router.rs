//! Pattern-based intent routing for inbound messages.
//!
//! Intents are evaluated in a fixed priority order and only the first whose
//! patterns match and whose scopes include the message scope produces an
//! action. Every pattern is a case-insensitive search, except help which
//! must be the whole (trimmed) message.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveTime;
use jokebot_core::{BotIdentity, JokeStore, MessageScope};
use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::events::ScopedMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intent {
    Salutation,
    Joke,
    Help,
    Gratitude,
    Image,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Salutation => "salutation",
            Self::Joke => "joke",
            Self::Help => "help",
            Self::Gratitude => "gratitude",
            Self::Image => "image",
        }
    }
}

const SALUTATION_PATTERNS: &[&str] = &[
    r"\bhello\b",
    r"\bhi\b",
    r"\bhey\b",
    r"\bhowdy\b",
    r"\bgreetings\b",
    r"\bgood (?:morning|afternoon|evening)\b",
];
const JOKE_PATTERNS: &[&str] =
    &[r"\bjoke of the day\b", r"\bjokes?\b", r"\bmake me laugh\b", r"\bsomething funny\b"];
const HELP_PATTERNS: &[&str] = &[r"^help$"];
const GRATITUDE_PATTERNS: &[&str] = &[r"\bthanks?\b", r"\bthank you\b", r"\bty\b", r"\bcheers\b"];
const IMAGE_PATTERNS: &[&str] = &[r"^(?:gif|giphy|image|show me)\s+(.+)$"];

const CONVERSATIONAL_SCOPES: &[MessageScope] = &MessageScope::ADDRESSED;
const DIRECT_SCOPES: &[MessageScope] = &[MessageScope::DirectMessage, MessageScope::DirectMention];

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid pattern for {intent:?} intent: {source}")]
    InvalidPattern {
        intent: Intent,
        #[source]
        source: regex::Error,
    },
}

#[derive(Clone, Debug)]
pub struct IntentRule {
    intent: Intent,
    patterns: Vec<Regex>,
    scopes: HashSet<MessageScope>,
}

impl IntentRule {
    pub fn new(
        intent: Intent,
        patterns: &[&str],
        scopes: &[MessageScope],
    ) -> Result<Self, RouterError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| RouterError::InvalidPattern { intent, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { intent, patterns, scopes: scopes.iter().copied().collect() })
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn matches(&self, text: &str, scope: MessageScope) -> bool {
        self.scopes.contains(&scope) && self.patterns.iter().any(|pattern| pattern.is_match(text))
    }

    /// First capture group of the first matching pattern.
    fn capture(&self, text: &str) -> Option<String> {
        self.patterns.iter().find_map(|pattern| {
            pattern
                .captures(text)
                .and_then(|captures| captures.get(1))
                .map(|group| group.as_str().trim().to_owned())
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel_id: String,
    pub thread_ts: Option<String>,
}

impl ReplyTarget {
    pub fn of(message: &ScopedMessage) -> Self {
        Self { channel_id: message.channel_id.clone(), thread_ts: message.thread_ts.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Reply(String),
    /// Sent in order; a leading mention acknowledgment precedes the content.
    Conversation(Vec<String>),
    ImageSearch { query: String, acknowledgment: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutedAction {
    pub intent: Intent,
    pub target: ReplyTarget,
    pub action: Action,
}

#[derive(Clone, Debug, Default)]
pub struct RouterOptions {
    pub images_enabled: bool,
    pub broadcast_time: Option<NaiveTime>,
}

pub struct PatternRouter {
    rules: Vec<IntentRule>,
    jokes: Arc<JokeStore>,
    broadcast_time: Option<NaiveTime>,
}

impl PatternRouter {
    pub fn new(
        rules: Vec<IntentRule>,
        jokes: Arc<JokeStore>,
        broadcast_time: Option<NaiveTime>,
    ) -> Self {
        Self { rules, jokes, broadcast_time }
    }

    /// The production intent table, in priority order.
    pub fn standard(jokes: Arc<JokeStore>, options: RouterOptions) -> Result<Self, RouterError> {
        let mut rules = vec![
            IntentRule::new(Intent::Salutation, SALUTATION_PATTERNS, CONVERSATIONAL_SCOPES)?,
            IntentRule::new(Intent::Joke, JOKE_PATTERNS, CONVERSATIONAL_SCOPES)?,
            IntentRule::new(Intent::Help, HELP_PATTERNS, DIRECT_SCOPES)?,
            IntentRule::new(Intent::Gratitude, GRATITUDE_PATTERNS, CONVERSATIONAL_SCOPES)?,
        ];
        if options.images_enabled {
            rules.push(IntentRule::new(Intent::Image, IMAGE_PATTERNS, DIRECT_SCOPES)?);
        }

        Ok(Self::new(rules, jokes, options.broadcast_time))
    }

    pub fn intents(&self) -> impl Iterator<Item = Intent> + '_ {
        self.rules.iter().map(IntentRule::intent)
    }

    pub fn match_intent(&self, text: &str, scope: MessageScope) -> Option<Intent> {
        self.matching_rule(text.trim(), scope).map(IntentRule::intent)
    }

    pub fn route(&self, message: &ScopedMessage, identity: &BotIdentity) -> Option<RoutedAction> {
        let text = message.text.trim();
        let rule = self.matching_rule(text, message.scope)?;
        let sender = message.user_id.as_deref().map(|user| format!("<@{user}>"));

        let action = match rule.intent {
            Intent::Salutation => Action::Reply(match &sender {
                Some(mention) => format!("Hello {mention}! Ask me for a joke any time."),
                None => "Hello! Ask me for a joke any time.".to_owned(),
            }),
            Intent::Joke => {
                let joke = self.jokes.pick_random().to_owned();
                let mut lines = Vec::with_capacity(2);
                if let Some(mention) = &sender {
                    lines.push(format!("{mention} here's one for you:"));
                }
                lines.push(joke);
                Action::Conversation(lines)
            }
            Intent::Help => Action::Reply(self.help_text(identity)),
            Intent::Gratitude => Action::Reply(match &sender {
                Some(mention) => format!("You're welcome, {mention}!"),
                None => "You're welcome!".to_owned(),
            }),
            Intent::Image => {
                let query = rule.capture(text).unwrap_or_else(|| text.to_owned());
                let acknowledgment = sender
                    .as_ref()
                    .map(|mention| format!("{mention} looking for a GIF of `{query}`..."));
                Action::ImageSearch { query, acknowledgment }
            }
        };

        Some(RoutedAction { intent: rule.intent, target: ReplyTarget::of(message), action })
    }

    fn matching_rule(&self, text: &str, scope: MessageScope) -> Option<&IntentRule> {
        self.rules.iter().find(|rule| rule.matches(text, scope))
    }

    fn help_text(&self, identity: &BotIdentity) -> String {
        let mut help = format!(
            "I'm {name}. Here's what I answer to:\n\
             • say hello\n\
             • ask me for a joke (\"tell me a joke\")\n\
             • say thanks",
            name = identity.name
        );
        if self.intents().any(|intent| intent == Intent::Image) {
            help.push_str("\n• `gif <search terms>` and I'll find a GIF");
        }
        if let Some(time) = self.broadcast_time {
            help.push_str(&format!(
                "\nEvery day at {} I post a joke of the day in every channel and group I'm in.",
                time.format("%H:%M")
            ));
        }
        help
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveTime;
    use jokebot_core::{BotIdentity, JokeStore, MessageScope};

    use super::{Action, Intent, IntentRule, PatternRouter, RouterError, RouterOptions};
    use crate::events::ScopedMessage;

    const JOKES: [&str; 2] = ["joke one", "joke two"];

    fn router(options: RouterOptions) -> PatternRouter {
        let jokes = JokeStore::new(JOKES.iter().map(|joke| (*joke).to_owned()).collect())
            .expect("jokes");
        PatternRouter::standard(Arc::new(jokes), options).expect("router")
    }

    fn scoped(text: &str, scope: MessageScope, user: Option<&str>) -> ScopedMessage {
        ScopedMessage {
            channel_id: "D1".to_owned(),
            user_id: user.map(str::to_owned),
            text: text.to_owned(),
            scope,
            thread_ts: None,
        }
    }

    fn identity() -> BotIdentity {
        BotIdentity::new("B1", "jokebot")
    }

    #[test]
    fn hello_in_direct_message_fires_only_salutation() {
        let router = router(RouterOptions::default());
        assert_eq!(
            router.match_intent("hello", MessageScope::DirectMessage),
            Some(Intent::Salutation)
        );
    }

    #[test]
    fn help_requires_exact_text() {
        let router = router(RouterOptions::default());
        assert_eq!(router.match_intent("help", MessageScope::DirectMessage), Some(Intent::Help));
        assert_eq!(router.match_intent("  HELP ", MessageScope::DirectMention), Some(Intent::Help));
        assert_eq!(
            router.match_intent("hello help", MessageScope::DirectMessage),
            Some(Intent::Salutation)
        );
        assert_eq!(router.match_intent("help me please", MessageScope::DirectMessage), None);
    }

    #[test]
    fn salutation_outranks_gratitude() {
        let router = router(RouterOptions::default());
        assert_eq!(
            router.match_intent("hi, thanks a lot", MessageScope::DirectMention),
            Some(Intent::Salutation)
        );
        assert_eq!(
            router.match_intent("thanks a lot", MessageScope::DirectMention),
            Some(Intent::Gratitude)
        );
    }

    #[test]
    fn matching_is_case_insensitive_substring_search() {
        let router = router(RouterOptions::default());
        assert_eq!(
            router.match_intent("Could you TELL ME A JOKE please", MessageScope::Mention),
            Some(Intent::Joke)
        );
        assert_eq!(router.match_intent("philosophy", MessageScope::DirectMessage), None);
    }

    #[test]
    fn scope_outside_intent_scopes_does_not_fire() {
        let router = router(RouterOptions::default());
        assert_eq!(router.match_intent("hello", MessageScope::Ambient), None);
        assert_eq!(router.match_intent("help", MessageScope::Mention), None);
    }

    #[test]
    fn joke_request_acknowledges_sender_then_tells_joke() {
        let router = router(RouterOptions::default());
        let message = scoped("tell me a joke", MessageScope::DirectMention, Some("U9"));

        let routed = router.route(&message, &identity()).expect("routed");

        assert_eq!(routed.intent, Intent::Joke);
        let Action::Conversation(lines) = routed.action else {
            panic!("joke should open a conversation");
        };
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("<@U9>"));
        assert!(JOKES.contains(&lines[1].as_str()));
    }

    #[test]
    fn replies_omit_mention_clause_without_sender() {
        let router = router(RouterOptions::default());

        let hello = router.route(&scoped("hey", MessageScope::DirectMessage, None), &identity());
        assert_eq!(
            hello.map(|routed| routed.action),
            Some(Action::Reply("Hello! Ask me for a joke any time.".to_owned()))
        );

        let thanks =
            router.route(&scoped("thank you", MessageScope::DirectMessage, None), &identity());
        assert_eq!(
            thanks.map(|routed| routed.action),
            Some(Action::Reply("You're welcome!".to_owned()))
        );

        let joke = router
            .route(&scoped("joke please", MessageScope::DirectMessage, None), &identity())
            .expect("joke");
        assert!(matches!(joke.action, Action::Conversation(ref lines) if lines.len() == 1));
    }

    #[test]
    fn help_text_names_bot_and_broadcast_time() {
        let router = router(RouterOptions {
            images_enabled: true,
            broadcast_time: NaiveTime::from_hms_opt(15, 0, 0),
        });

        let routed = router
            .route(&scoped("help", MessageScope::DirectMessage, Some("U1")), &identity())
            .expect("help");

        let Action::Reply(text) = routed.action else {
            panic!("help should reply");
        };
        assert!(text.starts_with("I'm jokebot."));
        assert!(text.contains("15:00"));
        assert!(text.contains("gif"));
    }

    #[test]
    fn image_intent_only_exists_when_enabled() {
        let disabled = router(RouterOptions::default());
        assert_eq!(disabled.match_intent("gif dancing cat", MessageScope::DirectMessage), None);

        let enabled = router(RouterOptions { images_enabled: true, ..RouterOptions::default() });
        let routed = enabled
            .route(&scoped("gif dancing cat", MessageScope::DirectMessage, Some("U2")), &identity())
            .expect("image");
        assert_eq!(
            routed.action,
            Action::ImageSearch {
                query: "dancing cat".to_owned(),
                acknowledgment: Some("<@U2> looking for a GIF of `dancing cat`...".to_owned()),
            }
        );
    }

    #[test]
    fn invalid_pattern_is_reported_with_intent() {
        let error = IntentRule::new(Intent::Joke, &["(unclosed"], &[MessageScope::DirectMessage]);
        assert!(matches!(error, Err(RouterError::InvalidPattern { intent: Intent::Joke, .. })));
    }
}
