use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Channel,
    Group,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Group => "group",
        }
    }
}

/// A channel or private group the bot may post into.
///
/// Channels carry `bot_is_member` directly; groups derive membership from
/// `members`, which is empty for channels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub archived: bool,
    pub bot_is_member: bool,
    pub members: BTreeSet<String>,
}

impl Destination {
    pub fn channel(id: impl Into<String>) -> Self {
        Self { id: id.into(), archived: false, bot_is_member: true, members: BTreeSet::new() }
    }

    pub fn group<I, S>(id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            archived: false,
            bot_is_member: false,
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    pub fn bot_is_member(mut self, bot_is_member: bool) -> Self {
        self.bot_is_member = bot_is_member;
        self
    }

    pub fn is_eligible_channel(&self) -> bool {
        !self.archived && self.bot_is_member
    }

    pub fn is_eligible_group(&self, bot_id: &str) -> bool {
        !self.archived && self.members.contains(bot_id)
    }

    pub fn is_eligible(&self, kind: DestinationKind, bot_id: &str) -> bool {
        match kind {
            DestinationKind::Channel => self.is_eligible_channel(),
            DestinationKind::Group => self.is_eligible_group(bot_id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub id: String,
    pub name: String,
}

impl BotIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }

    pub fn mention_token(&self) -> String {
        format!("<@{}>", self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownUser {
    pub id: String,
    pub name: String,
}

/// Payload delivered by a successful (re)connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub identity: BotIdentity,
    pub users: Vec<KnownUser>,
    pub channels: Vec<Destination>,
    pub groups: Vec<Destination>,
}

impl ConnectionSnapshot {
    pub fn new(identity: BotIdentity) -> Self {
        Self { identity, users: Vec::new(), channels: Vec::new(), groups: Vec::new() }
    }

    pub fn eligible_channels(&self) -> Vec<Destination> {
        self.channels.iter().filter(|channel| channel.is_eligible_channel()).cloned().collect()
    }

    pub fn eligible_groups(&self) -> Vec<Destination> {
        self.groups
            .iter()
            .filter(|group| group.is_eligible_group(&self.identity.id))
            .cloned()
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageScope {
    DirectMessage,
    DirectMention,
    Mention,
    Ambient,
}

impl MessageScope {
    pub const ADDRESSED: [MessageScope; 3] =
        [MessageScope::DirectMessage, MessageScope::DirectMention, MessageScope::Mention];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectMessage => "direct_message",
            Self::DirectMention => "direct_mention",
            Self::Mention => "mention",
            Self::Ambient => "ambient",
        }
    }
}

impl fmt::Display for MessageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown message scope `{0}`")]
pub struct UnknownScope(pub String);

impl FromStr for MessageScope {
    type Err = UnknownScope;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct_message" => Ok(Self::DirectMessage),
            "direct_mention" => Ok(Self::DirectMention),
            "mention" => Ok(Self::Mention),
            "ambient" => Ok(Self::Ambient),
            other => Err(UnknownScope(other.to_owned())),
        }
    }
}
