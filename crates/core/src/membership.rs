//! Tracks the channels and groups the bot currently belongs to.
//!
//! The tracker is the only owner of membership state. Callers mutate it
//! through the edit methods and read it through [`MembershipTracker::snapshot`],
//! which hands out an owned copy so a reader (the daily broadcast) never
//! observes a half-applied edit from the event stream.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::domain::{Destination, DestinationKind};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    channels: BTreeMap<String, Destination>,
    groups: BTreeMap<String, Destination>,
}

impl MembershipSnapshot {
    pub fn channels(&self) -> impl Iterator<Item = &Destination> {
        self.channels.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Destination> {
        self.groups.values()
    }

    /// Both partitions, channels first.
    pub fn destinations(&self) -> impl Iterator<Item = (DestinationKind, &Destination)> {
        self.channels()
            .map(|channel| (DestinationKind::Channel, channel))
            .chain(self.groups().map(|group| (DestinationKind::Group, group)))
    }

    pub fn contains(&self, kind: DestinationKind, id: &str) -> bool {
        self.partition(kind).contains_key(id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn len(&self) -> usize {
        self.channels.len() + self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn partition(&self, kind: DestinationKind) -> &BTreeMap<String, Destination> {
        match kind {
            DestinationKind::Channel => &self.channels,
            DestinationKind::Group => &self.groups,
        }
    }

    fn partition_mut(&mut self, kind: DestinationKind) -> &mut BTreeMap<String, Destination> {
        match kind {
            DestinationKind::Channel => &mut self.channels,
            DestinationKind::Group => &mut self.groups,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub channels: usize,
    pub groups: usize,
    pub rejected: usize,
}

#[derive(Debug)]
struct SeededState {
    bot_id: String,
    membership: MembershipSnapshot,
}

#[derive(Debug, Default)]
pub struct MembershipTracker {
    state: RwLock<Option<SeededState>>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all membership state. Destinations that are archived or that
    /// the bot does not belong to are dropped.
    pub fn seed<C, G>(&self, bot_id: &str, channels: C, groups: G) -> SeedSummary
    where
        C: IntoIterator<Item = Destination>,
        G: IntoIterator<Item = Destination>,
    {
        let mut membership = MembershipSnapshot::default();
        let mut rejected = 0;

        for (kind, destination) in channels
            .into_iter()
            .map(|channel| (DestinationKind::Channel, channel))
            .chain(groups.into_iter().map(|group| (DestinationKind::Group, group)))
        {
            if destination.is_eligible(kind, bot_id) {
                membership.partition_mut(kind).insert(destination.id.clone(), destination);
            } else {
                rejected += 1;
            }
        }

        let summary = SeedSummary {
            channels: membership.channel_count(),
            groups: membership.group_count(),
            rejected,
        };
        *self.write() = Some(SeededState { bot_id: bot_id.to_owned(), membership });
        summary
    }

    pub fn add_channel(&self, destination: Destination) -> bool {
        self.add(DestinationKind::Channel, destination)
    }

    pub fn remove_channel(&self, id: &str) -> bool {
        self.remove(DestinationKind::Channel, id)
    }

    pub fn add_group(&self, destination: Destination) -> bool {
        self.add(DestinationKind::Group, destination)
    }

    pub fn remove_group(&self, id: &str) -> bool {
        self.remove(DestinationKind::Group, id)
    }

    /// Returns `true` when the destination was newly inserted.
    pub fn add(&self, kind: DestinationKind, destination: Destination) -> bool {
        let mut guard = self.write();
        let Some(state) = guard.as_mut() else {
            debug!(
                event_name = "membership.edit_before_seed",
                kind = kind.as_str(),
                destination_id = %destination.id,
                "ignoring membership edit before first seed"
            );
            return false;
        };

        if !destination.is_eligible(kind, &state.bot_id) {
            debug!(
                event_name = "membership.edit_rejected",
                kind = kind.as_str(),
                destination_id = %destination.id,
                archived = destination.archived,
                "destination does not satisfy membership filter"
            );
            return false;
        }

        let partition = state.membership.partition_mut(kind);
        if partition.contains_key(&destination.id) {
            return false;
        }
        partition.insert(destination.id.clone(), destination);
        true
    }

    /// Returns `true` when an entry was removed.
    pub fn remove(&self, kind: DestinationKind, id: &str) -> bool {
        self.write()
            .as_mut()
            .map(|state| state.membership.partition_mut(kind).remove(id).is_some())
            .unwrap_or(false)
    }

    /// Owned copy of the current membership, or `None` if never seeded.
    pub fn snapshot(&self) -> Option<MembershipSnapshot> {
        self.read().as_ref().map(|state| state.membership.clone())
    }

    pub fn is_seeded(&self) -> bool {
        self.read().is_some()
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<SeededState>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<SeededState>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
