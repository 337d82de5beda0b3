//! Party State Store - the authoritative in-memory record for one party.
//!
//! Pure data with no concurrency logic of its own: it is only ever touched
//! from inside the owning `PartyActor`'s message loop, which is the only lock.

mod member;
mod settings;

pub use member::{ConnectionStatus, LocalPlayer, MemberSnapshot, PartyMember, PartyMemberStatus};
pub use settings::{PartyConfiguration, PartySettingsUpdate, MAX_MEMBERS_SETTING};

use crate::errors::PartyError;
use crate::invitations::Invitation;

use common::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A peer that passed the low-level connect gate but is not a member yet.
#[derive(Debug, Clone)]
pub struct PendingPeer {
    pub session_id: SessionId,
    pub user_id: UserId,
}

/// The party aggregate.
#[derive(Debug)]
pub struct PartyState {
    /// Bumped on every observable mutation of members or settings.
    pub version_number: u64,
    /// Bumped on settings mutations only; fences ready-state updates.
    pub settings_version_number: u64,
    pub settings: PartyConfiguration,
    pub members: HashMap<SessionId, PartyMember>,
    pub pending_accepted_peers: HashMap<SessionId, PendingPeer>,
    /// Bag for other subsystems (e.g. a linked game session id).
    pub server_data: HashMap<String, serde_json::Value>,
    /// recipient -> sender -> invitation
    pub pending_invitations: HashMap<UserId, HashMap<UserId, Invitation>>,
    next_join_sequence: u64,
}

impl PartyState {
    #[must_use]
    pub fn new(settings: PartyConfiguration) -> Self {
        Self {
            version_number: 0,
            settings_version_number: 0,
            settings,
            members: HashMap::new(),
            pending_accepted_peers: HashMap::new(),
            server_data: HashMap::new(),
            pending_invitations: HashMap::new(),
            next_join_sequence: 0,
        }
    }

    /// Record a committed mutation and return the new version.
    pub fn commit(&mut self) -> u64 {
        self.version_number += 1;
        self.version_number
    }

    /// Record a committed settings mutation. Returns `(version, settings_version)`.
    pub fn commit_settings(&mut self) -> (u64, u64) {
        self.settings_version_number += 1;
        (self.commit(), self.settings_version_number)
    }

    pub fn next_join_sequence(&mut self) -> u64 {
        let sequence = self.next_join_sequence;
        self.next_join_sequence += 1;
        sequence
    }

    #[must_use]
    pub fn member(&self, session_id: &SessionId) -> Option<&PartyMember> {
        self.members.get(session_id)
    }

    #[must_use]
    pub fn member_by_user(&self, user_id: &UserId) -> Option<&PartyMember> {
        self.members.values().find(|m| &m.user_id == user_id)
    }

    #[must_use]
    pub fn session_of(&self, user_id: &UserId) -> Option<SessionId> {
        self.member_by_user(user_id).map(|m| m.session_id)
    }

    /// The caller's member entry, which must be `Connected`.
    pub fn connected_member(&self, session_id: &SessionId) -> Result<&PartyMember, PartyError> {
        self.members
            .get(session_id)
            .filter(|m| m.is_connected())
            .ok_or(PartyError::NotInParty)
    }

    /// The caller's member entry, which must be connected and the leader.
    pub fn require_leader(&self, session_id: &SessionId) -> Result<&PartyMember, PartyError> {
        let member = self.connected_member(session_id)?;
        if self.is_leader(&member.user_id) {
            Ok(member)
        } else {
            Err(PartyError::Unauthorized(
                "Only the party leader can perform this operation".to_string(),
            ))
        }
    }

    #[must_use]
    pub fn is_leader(&self, user_id: &UserId) -> bool {
        &self.settings.party_leader_id == user_id
    }

    /// Set every `Ready` member back to `NotReady`. Returns the users that changed.
    pub fn reset_ready_states(&mut self) -> Vec<UserId> {
        let mut reset: Vec<UserId> = self
            .members
            .values_mut()
            .filter(|m| m.is_ready())
            .map(|m| {
                m.status_in_party = PartyMemberStatus::NotReady;
                m.user_id.clone()
            })
            .collect();
        reset.sort();
        reset
    }

    /// Slots taken by members, reservations and peers still in the connect gate.
    #[must_use]
    pub fn occupied_slots(&self) -> usize {
        self.members.len() + self.pending_accepted_peers.len()
    }

    /// Member cap: `platform.maxMembers` if set, `default_max` otherwise.
    #[must_use]
    pub fn member_cap(&self, default_max: usize) -> usize {
        self.settings.max_members().unwrap_or(default_max)
    }

    #[must_use]
    pub fn connected_sessions(&self) -> Vec<SessionId> {
        self.members
            .values()
            .filter(|m| m.is_connected())
            .map(|m| m.session_id)
            .collect()
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.members.values().filter(|m| m.is_connected()).count()
    }

    /// Longest-connected member other than `excluding`, falling back to the
    /// oldest reservation when nobody else is connected.
    #[must_use]
    pub fn next_leader(&self, excluding: &UserId) -> Option<UserId> {
        self.members
            .values()
            .filter(|m| &m.user_id != excluding)
            .min_by_key(|m| (!m.is_connected(), m.join_sequence))
            .map(|m| m.user_id.clone())
    }

    /// Snapshots of `users`, in join order.
    #[must_use]
    pub fn member_batch(&self, users: &BTreeSet<UserId>) -> Vec<MemberSnapshot> {
        let leader = &self.settings.party_leader_id;
        let mut members: Vec<&PartyMember> = self
            .members
            .values()
            .filter(|m| users.contains(&m.user_id))
            .collect();
        members.sort_by_key(|m| m.join_sequence);
        members.into_iter().map(|m| m.to_snapshot(leader)).collect()
    }

    /// True when at least one member is connected and every connected member is ready.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        let mut connected = self.members.values().filter(|m| m.is_connected()).peekable();
        connected.peek().is_some() && connected.all(PartyMember::is_ready)
    }

    #[must_use]
    pub fn has_pending_invitation_for(&self, user_id: &UserId) -> bool {
        self.pending_invitations
            .get(user_id)
            .is_some_and(|by_sender| !by_sender.is_empty())
    }

    #[must_use]
    pub fn pending_invitation_count(&self) -> usize {
        self.pending_invitations.values().map(HashMap::len).sum()
    }

    /// Consistent copy of members and settings at the current version.
    #[must_use]
    pub fn snapshot(&self) -> PartySnapshot {
        let leader = &self.settings.party_leader_id;
        let mut members: Vec<&PartyMember> = self.members.values().collect();
        members.sort_by_key(|m| m.join_sequence);

        PartySnapshot {
            version_number: self.version_number,
            settings_version_number: self.settings_version_number,
            settings: self.settings.clone(),
            members: members.into_iter().map(|m| m.to_snapshot(leader)).collect(),
        }
    }
}

/// Full party state as sent to clients and observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySnapshot {
    pub version_number: u64,
    pub settings_version_number: u64,
    pub settings: PartyConfiguration,
    pub members: Vec<MemberSnapshot>,
}

impl PartySnapshot {
    #[must_use]
    pub fn member(&self, user_id: &UserId) -> Option<&MemberSnapshot> {
        self.members.iter().find(|m| &m.user_id == user_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::PartyId;
    use tokio::time::Instant;

    fn state_with(users: &[&str]) -> (PartyState, Vec<SessionId>) {
        let settings = PartyConfiguration::new(
            PartyId::new(),
            UserId::from(users[0]),
            PartySettingsUpdate::default(),
        );
        let mut state = PartyState::new(settings);
        let mut sessions = Vec::new();
        for user in users {
            let session = SessionId::new();
            let seq = state.next_join_sequence();
            state
                .members
                .insert(session, PartyMember::connected(UserId::from(*user), session, seq));
            sessions.push(session);
        }
        (state, sessions)
    }

    #[test]
    fn test_version_counters_are_independent() {
        let (mut state, _) = state_with(&["leader"]);

        assert_eq!(state.commit(), 1);
        assert_eq!(state.commit(), 2);
        assert_eq!(state.settings_version_number, 0);

        assert_eq!(state.commit_settings(), (3, 1));
        assert_eq!(state.version_number, 3);
    }

    #[test]
    fn test_reset_ready_states_only_touches_ready_members() {
        let (mut state, sessions) = state_with(&["leader", "m1", "m2"]);
        let m1 = state.members.get_mut(&sessions[1]).unwrap();
        m1.status_in_party = PartyMemberStatus::Ready;
        m1.user_data = vec![1, 2, 3];

        let reset = state.reset_ready_states();

        assert_eq!(reset, vec![UserId::from("m1")]);
        let m1 = state.member(&sessions[1]).unwrap();
        assert_eq!(m1.status_in_party, PartyMemberStatus::NotReady);
        assert_eq!(m1.user_data, vec![1, 2, 3]);
        assert_eq!(state.version_number, 0);
    }

    #[test]
    fn test_require_leader() {
        let (state, sessions) = state_with(&["leader", "member"]);

        assert!(state.require_leader(&sessions[0]).is_ok());
        assert!(matches!(
            state.require_leader(&sessions[1]),
            Err(PartyError::Unauthorized(_))
        ));
        assert_eq!(
            state.require_leader(&SessionId::new()).unwrap_err(),
            PartyError::NotInParty
        );
    }

    #[test]
    fn test_reservation_is_not_connected_member() {
        let (mut state, _) = state_with(&["leader"]);
        let seq = state.next_join_sequence();
        let reservation = PartyMember::reservation(UserId::from("guest"), seq, Instant::now());
        let session = reservation.session_id;
        state.members.insert(session, reservation);

        assert_eq!(
            state.connected_member(&session).unwrap_err(),
            PartyError::NotInParty
        );
        assert_eq!(state.occupied_slots(), 2);
        assert_eq!(state.connected_count(), 1);
    }

    #[test]
    fn test_next_leader_is_longest_connected() {
        let (state, _) = state_with(&["leader", "first", "second"]);
        assert_eq!(
            state.next_leader(&UserId::from("leader")),
            Some(UserId::from("first"))
        );
    }

    #[test]
    fn test_next_leader_falls_back_to_reservation() {
        let (mut state, _) = state_with(&["leader"]);
        let seq = state.next_join_sequence();
        let reservation = PartyMember::reservation(UserId::from("guest"), seq, Instant::now());
        state.members.insert(reservation.session_id, reservation);

        assert_eq!(
            state.next_leader(&UserId::from("leader")),
            Some(UserId::from("guest"))
        );
    }

    #[test]
    fn test_member_batch_filters_and_orders() {
        let (state, _) = state_with(&["leader", "a", "b"]);
        let users: BTreeSet<UserId> = [UserId::from("b"), UserId::from("leader")].into();

        let batch = state.member_batch(&users);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].user_id, UserId::from("leader"));
        assert_eq!(batch[1].user_id, UserId::from("b"));
    }

    #[test]
    fn test_all_ready() {
        let (mut state, sessions) = state_with(&["leader", "member"]);
        assert!(!state.all_ready());

        for session in &sessions {
            state.members.get_mut(session).unwrap().status_in_party = PartyMemberStatus::Ready;
        }
        assert!(state.all_ready());

        let empty = PartyState::new(state.settings.clone());
        assert!(!empty.all_ready());
    }

    #[test]
    fn test_snapshot_orders_members_and_flags_leader() {
        let (mut state, _) = state_with(&["leader", "member"]);
        state.commit();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.version_number, 1);
        assert_eq!(snapshot.members.len(), 2);
        assert_eq!(snapshot.members[0].user_id, UserId::from("leader"));
        assert!(snapshot.members[0].is_leader);
        assert!(!snapshot.members[1].is_leader);
    }
}
