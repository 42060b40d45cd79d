//! Slack real-time bot: event routing, membership-aware broadcasts and the
//! connection lifecycle.
//!
//! - **Wire** (`wire`) - decodes real-time JSON payloads into [`events::SlackEvent`]
//! - **Events** (`events`) - message scoping, `EventDispatcher` and the per-connection handlers
//! - **Router** (`router`) - fixed-priority intent table mapping text to actions
//! - **Actions** (`actions`) - outbound message shape and the `ActionExecutor`
//! - **Images** (`images`) - optional Giphy lookup for the image intent
//! - **Broadcast** (`broadcast`) - daily joke of the day to every tracked destination
//! - **Socket** (`socket`) - `ConnectionSupervisor` over an `RtmTransport`
//! - **Bot** (`bot`) - `BotCore`, the composition root
//!
//! # Architecture
//!
//! ```text
//! RtmTransport → ConnectionSupervisor → EventDispatcher → MessageHandler → PatternRouter
//!                      ↓ seed                     ↓                          ↓
//!               MembershipTracker ← MembershipHandler          ActionExecutor → send
//!                      ↑
//!            ScheduledBroadcaster (daily) → send
//! ```
//!
//! Every (re)connection re-seeds membership from the handshake snapshot and
//! registers a fresh handler set, so reconnects never merge stale state.

pub mod actions;
pub mod bot;
pub mod broadcast;
pub mod events;
pub mod images;
pub mod router;
pub mod socket;
pub mod wire;
