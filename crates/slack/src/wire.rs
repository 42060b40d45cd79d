//! Decoding of real-time JSON payloads into the bot's event model.

use std::collections::BTreeSet;

use jokebot_core::{BotIdentity, ConnectionSnapshot, Destination, DestinationKind, KnownUser};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::events::{InboundMessage, SlackEvent};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed connection payload: {0}")]
    Snapshot(#[source] serde_json::Error),
    #[error("malformed `{event_type}` event: {source}")]
    Event {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(rename = "self")]
    identity: RawIdentity,
    #[serde(default)]
    users: Vec<RawUser>,
    #[serde(default)]
    channels: Vec<RawDestination>,
    #[serde(default)]
    groups: Vec<RawDestination>,
}

#[derive(Debug, Deserialize)]
struct RawIdentity {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawDestination {
    id: String,
    #[serde(default)]
    is_archived: bool,
    #[serde(default)]
    is_member: bool,
    #[serde(default)]
    members: BTreeSet<String>,
}

impl From<RawDestination> for Destination {
    fn from(raw: RawDestination) -> Self {
        Self {
            id: raw.id,
            archived: raw.is_archived,
            bot_is_member: raw.is_member,
            members: raw.members,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDestinationEvent {
    channel: RawDestination,
}

#[derive(Debug, Deserialize)]
struct RawLeftEvent {
    channel: String,
}

#[derive(Debug, Deserialize)]
struct RawMemberJoined {
    channel: String,
    user: String,
    #[serde(default)]
    channel_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    channel: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
}

pub fn parse_snapshot(payload: &Value) -> Result<ConnectionSnapshot, WireError> {
    let raw = RawSnapshot::deserialize(payload).map_err(WireError::Snapshot)?;

    Ok(ConnectionSnapshot {
        identity: BotIdentity::new(raw.identity.id, raw.identity.name),
        users: raw
            .users
            .into_iter()
            .map(|user| KnownUser { id: user.id, name: user.name })
            .collect(),
        channels: raw.channels.into_iter().map(Destination::from).collect(),
        groups: raw.groups.into_iter().map(Destination::from).collect(),
    })
}

pub fn parse_event(payload: &Value) -> Result<SlackEvent, WireError> {
    let event_type = payload.get("type").and_then(Value::as_str).unwrap_or_default();
    let malformed =
        |source: serde_json::Error| WireError::Event { event_type: event_type.to_owned(), source };

    let event = match event_type {
        "message" => {
            let raw = RawMessage::deserialize(payload).map_err(malformed)?;
            SlackEvent::Message(InboundMessage {
                channel_id: raw.channel,
                user_id: raw.user,
                text: raw.text,
                ts: raw.ts,
                thread_ts: raw.thread_ts,
                bot_id: raw.bot_id,
                subtype: raw.subtype,
            })
        }
        "channel_joined" => {
            let raw = RawDestinationEvent::deserialize(payload).map_err(malformed)?;
            SlackEvent::ChannelJoined(raw.channel.into())
        }
        "group_joined" => {
            let raw = RawDestinationEvent::deserialize(payload).map_err(malformed)?;
            SlackEvent::GroupJoined(raw.channel.into())
        }
        "channel_left" => {
            let raw = RawLeftEvent::deserialize(payload).map_err(malformed)?;
            SlackEvent::ChannelLeft { channel_id: raw.channel }
        }
        "group_left" => {
            let raw = RawLeftEvent::deserialize(payload).map_err(malformed)?;
            SlackEvent::GroupLeft { channel_id: raw.channel }
        }
        "member_joined_channel" => {
            let raw = RawMemberJoined::deserialize(payload).map_err(malformed)?;
            let kind = match raw.channel_type.as_deref() {
                Some("G") => DestinationKind::Group,
                _ => DestinationKind::Channel,
            };
            SlackEvent::MemberJoined { channel_id: raw.channel, user_id: raw.user, kind }
        }
        other => SlackEvent::Unsupported {
            event_type: if other.is_empty() { "unknown".to_owned() } else { other.to_owned() },
        },
    };

    Ok(event)
}
