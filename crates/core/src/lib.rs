//! Core domain for jokebot: jokes, channel membership, configuration and
//! the error taxonomy shared by the Slack runtime and the server binary.

pub mod config;
pub mod domain;
pub mod errors;
pub mod jokes;
pub mod membership;

pub use domain::{
    BotIdentity, ConnectionSnapshot, Destination, DestinationKind, KnownUser, MessageScope,
};
pub use errors::ApplicationError;
pub use jokes::{JokeStore, JokeStoreError};
pub use membership::{MembershipSnapshot, MembershipTracker, SeedSummary};
