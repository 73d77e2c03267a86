//! This module contains the Room struct.
//! A Room exists while at least one user is joined to its voice channel, either
//! through a live connection or a REST-only join. It owns that channel's
//! membership and fans signaling frames out to the members' sessions.

use std::collections::HashMap;

use lib_common_kodama::types::{ChannelId, Participant, SignalMessage, UserId};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::vc::session::{Frame, SessionLink, encode};

#[derive(Debug, Clone)]
pub struct Member {
    pub username: String,
    pub muted: bool,
    /// Absent for a REST-only join.
    pub link: Option<SessionLink>,
}

impl Member {
    pub fn is_live(&self) -> bool {
        self.link.is_some()
    }
}

/// Membership of one room. Only reachable through the room's lock.
#[derive(Debug, Default)]
pub struct RoomState {
    members: HashMap<UserId, Member>,
    /// Set under the lock when the hub drops this room; joiners must retry.
    closed: bool,
}

impl RoomState {
    /// Insert a member, handing back whoever held the slot before.
    pub fn join(&mut self, user_id: UserId, member: Member) -> Option<Member> {
        self.members.insert(user_id, member)
    }

    pub fn leave(&mut self, user_id: UserId) -> Option<Member> {
        self.members.remove(&user_id)
    }

    pub fn member(&self, user_id: UserId) -> Option<&Member> {
        self.members.get(&user_id)
    }

    pub fn member_mut(&mut self, user_id: UserId) -> Option<&mut Member> {
        self.members.get_mut(&user_id)
    }

    /// Queue `frame` for every live member except `exclude`. Returns how many
    /// accepted it; a refusing member is evicted and the rest still get it.
    pub fn broadcast(&self, frame: &Frame, exclude: Option<UserId>) -> usize {
        self.members
            .iter()
            .filter(|(user_id, _)| Some(**user_id) != exclude)
            .filter_map(|(_, member)| member.link.as_ref())
            .filter(|link| link.deliver(frame))
            .count()
    }

    /// False when the target is absent or has no live connection.
    pub fn unicast(&self, to: UserId, frame: &Frame) -> bool {
        self.members
            .get(&to)
            .and_then(|member| member.link.as_ref())
            .is_some_and(|link| link.deliver(frame))
    }

    /// Every member, ordered by user id.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.collect(|_| true)
    }

    /// Members that can be negotiated with, i.e. the `room-peers` list.
    pub fn live_peers(&self) -> Vec<Participant> {
        self.collect(Member::is_live)
    }

    fn collect(&self, keep: impl Fn(&Member) -> bool) -> Vec<Participant> {
        let mut participants: Vec<_> = self
            .members
            .iter()
            .filter(|(_, member)| keep(member))
            .map(|(user_id, member)| Participant {
                user_id: *user_id,
                username: member.username.clone(),
                muted: member.muted,
            })
            .collect();
        participants.sort_unstable_by_key(|p| p.user_id);
        participants
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }
}

#[derive(Debug)]
pub struct Room {
    channel_id: ChannelId,
    state: RwLock<RoomState>,
}

impl Room {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            state: RwLock::new(RoomState::default()),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, RoomState> {
        self.state.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, RoomState> {
        self.state.write()
    }

    pub fn unicast(&self, to: UserId, msg: &SignalMessage) -> bool {
        encode(msg).is_some_and(|frame| self.read().unicast(to, &frame))
    }

    pub fn snapshot(&self) -> Vec<Participant> {
        self.read().snapshot()
    }
}
