//! `ClientPartyView` - what a client knows about its party.
//!
//! Any version gap triggers a full resync: an event tagged `last + 1` is
//! applied, an event tagged `<= last` is a duplicate and ignored, anything
//! else leaves the view untouched and returns [`ApplyResult::ResyncRequired`].

use crate::actors::messages::PartyEvent;
use crate::state::{PartyMemberStatus, PartySnapshot};

use common::UserId;

/// Result of applying one event to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    Applied,
    /// Already seen (version `<=` last applied).
    Duplicate,
    /// A version was missed; the client must request the full state.
    ResyncRequired { expected: u64, received: u64 },
    /// The party ended or the connection was closed.
    Terminated,
}

/// Client-side copy of the party state.
#[derive(Debug, Clone, Default)]
pub struct ClientPartyView {
    snapshot: Option<PartySnapshot>,
}

impl ClientPartyView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a full snapshot (join answer or resync).
    #[must_use]
    pub fn from_snapshot(snapshot: PartySnapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&PartySnapshot> {
        self.snapshot.as_ref()
    }

    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.version_number)
    }

    /// Apply a pushed event.
    pub fn apply(&mut self, event: &PartyEvent) -> ApplyResult {
        if let PartyEvent::FullState(snapshot) = event {
            self.snapshot = Some(snapshot.clone());
            return ApplyResult::Applied;
        }
        if matches!(
            event,
            PartyEvent::Disconnected { .. } | PartyEvent::Disbanded { .. }
        ) {
            self.snapshot = None;
            return ApplyResult::Terminated;
        }

        let Some(received) = event.version() else {
            return ApplyResult::Duplicate;
        };
        let Some(view) = self.snapshot.as_mut() else {
            return ApplyResult::ResyncRequired {
                expected: 0,
                received,
            };
        };

        let expected = view.version_number + 1;
        if received < expected {
            return ApplyResult::Duplicate;
        }
        if received > expected {
            return ApplyResult::ResyncRequired { expected, received };
        }

        match event {
            PartyEvent::MembersUpdated { members, .. } => {
                for member in members {
                    match view.members.iter_mut().find(|m| m.user_id == member.user_id) {
                        Some(existing) => *existing = member.clone(),
                        None => view.members.push(member.clone()),
                    }
                }
            }
            PartyEvent::SettingsUpdated {
                settings_version_number,
                settings,
                ready_reset,
                ..
            } => {
                view.settings = settings.clone();
                view.settings_version_number = *settings_version_number;
                reset_members(view, ready_reset);
                refresh_leader_flags(view);
            }
            PartyEvent::LeaderChanged { leader_id, .. } => {
                view.settings.party_leader_id = leader_id.clone();
                refresh_leader_flags(view);
            }
            PartyEvent::MemberDisconnected {
                user_id,
                new_leader,
                ready_reset,
                ..
            } => {
                view.members.retain(|m| &m.user_id != user_id);
                if let Some(leader) = new_leader {
                    view.settings.party_leader_id = leader.clone();
                }
                reset_members(view, ready_reset);
                refresh_leader_flags(view);
            }
            PartyEvent::FullState(_)
            | PartyEvent::Disconnected { .. }
            | PartyEvent::Disbanded { .. } => {}
        }

        view.version_number = received;
        ApplyResult::Applied
    }
}

fn reset_members(view: &mut PartySnapshot, users: &[UserId]) {
    for member in view.members.iter_mut().filter(|m| users.contains(&m.user_id)) {
        member.status_in_party = PartyMemberStatus::NotReady;
    }
}

fn refresh_leader_flags(view: &mut PartySnapshot) {
    let leader = view.settings.party_leader_id.clone();
    for member in &mut view.members {
        member.is_leader = member.user_id == leader;
    }
}
