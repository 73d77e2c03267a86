//! Connection-independent view of who sits in which voice channel.
//!
//! This is a projection of room membership, never a second source of truth:
//! the only writer is [`PresenceStore::apply`], called from inside a room's
//! critical section, so REST readers and live rooms agree whenever no
//! transition is in flight. The presence lock is the innermost lock of the
//! voice subsystem (hub, then rooms, then presence).

use std::collections::{BTreeMap, HashMap};

use lib_common_kodama::types::{ChannelId, Participant, UserId, VoiceState};
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub username: String,
    pub muted: bool,
}

impl From<&PresenceEntry> for Participant {
    fn from(entry: &PresenceEntry) -> Self {
        Participant {
            user_id: entry.user_id,
            username: entry.username.clone(),
            muted: entry.muted,
        }
    }
}

/// A membership transition that already happened in a room.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PresenceChange<'a> {
    /// Moves the user out of whatever channel they were in. Fresh joins are unmuted.
    Joined {
        channel_id: ChannelId,
        user_id: UserId,
        username: &'a str,
    },
    Left {
        channel_id: ChannelId,
        user_id: UserId,
    },
    Muted {
        channel_id: ChannelId,
        user_id: UserId,
        muted: bool,
    },
}

#[derive(Debug, Default)]
struct Tables {
    channels: HashMap<ChannelId, BTreeMap<UserId, PresenceEntry>>,
    /// Reverse index enforcing one voice channel per user.
    by_user: HashMap<UserId, ChannelId>,
}

impl Tables {
    fn remove(&mut self, channel_id: ChannelId, user_id: UserId) {
        if let Some(entries) = self.channels.get_mut(&channel_id) {
            entries.remove(&user_id);
            if entries.is_empty() {
                self.channels.remove(&channel_id);
            }
        }
        if self.by_user.get(&user_id) == Some(&channel_id) {
            self.by_user.remove(&user_id);
        }
    }
}

#[derive(Debug, Default)]
pub struct PresenceStore {
    tables: RwLock<Tables>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn apply(&self, change: PresenceChange<'_>) {
        let mut tables = self.tables.write();
        match change {
            PresenceChange::Joined {
                channel_id,
                user_id,
                username,
            } => {
                if let Some(previous) = tables.by_user.get(&user_id).copied() {
                    tables.remove(previous, user_id);
                }
                tables.channels.entry(channel_id).or_default().insert(
                    user_id,
                    PresenceEntry {
                        user_id,
                        username: username.to_owned(),
                        muted: false,
                    },
                );
                tables.by_user.insert(user_id, channel_id);
            }
            PresenceChange::Left {
                channel_id,
                user_id,
            } => tables.remove(channel_id, user_id),
            PresenceChange::Muted {
                channel_id,
                user_id,
                muted,
            } => {
                // A mute racing a leave finds nothing, which is fine.
                if let Some(entry) = tables
                    .channels
                    .get_mut(&channel_id)
                    .and_then(|entries| entries.get_mut(&user_id))
                {
                    entry.muted = muted;
                }
            }
        }
    }

    /// Participants of a channel ordered by user id. Empty for unknown channels.
    pub fn participants(&self, channel_id: ChannelId) -> Vec<Participant> {
        self.tables
            .read()
            .channels
            .get(&channel_id)
            .map(|entries| entries.values().map(Participant::from).collect())
            .unwrap_or_default()
    }

    pub fn channel_of(&self, user_id: UserId) -> Option<ChannelId> {
        self.tables.read().by_user.get(&user_id).copied()
    }

    pub fn entry(&self, user_id: UserId) -> Option<(ChannelId, PresenceEntry)> {
        let tables = self.tables.read();
        let channel_id = *tables.by_user.get(&user_id)?;
        let entry = tables.channels.get(&channel_id)?.get(&user_id)?.clone();
        Some((channel_id, entry))
    }

    pub fn user_state(&self, user_id: UserId) -> VoiceState {
        match self.entry(user_id) {
            Some((channel_id, entry)) => VoiceState::present(channel_id, entry.muted),
            None => VoiceState::absent(),
        }
    }

    /// Channels that currently have at least one participant.
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<_> = self.tables.read().channels.keys().copied().collect();
        channels.sort_unstable();
        channels
    }
}
