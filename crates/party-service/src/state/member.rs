//! `PartyMember` and its status enums.

use chrono::{DateTime, Utc};
use common::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Connection state machine of a member:
/// `Disconnected -> Reservation -> Connected -> Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    /// Slot held for a pre-authorized user that has not connected yet.
    Reservation,
    Connected,
}

/// Readiness for matchmaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartyMemberStatus {
    #[default]
    NotReady,
    Ready,
}

/// A local (split-screen) player attached to a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPlayer {
    pub player_id: String,
    pub platform: String,
    pub pseudo: String,
}

/// One joined (or reserved) user.
#[derive(Debug, Clone)]
pub struct PartyMember {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub connection_status: ConnectionStatus,
    pub status_in_party: PartyMemberStatus,
    /// Opaque game-defined data.
    pub user_data: Vec<u8>,
    pub local_players: Vec<LocalPlayer>,
    pub created_on_utc: DateTime<Utc>,
    /// Join order, used to pick the next leader.
    pub join_sequence: u64,
    /// Expiry of a reservation; `None` once connected.
    pub reserved_until: Option<Instant>,
}

impl PartyMember {
    /// A connected member.
    #[must_use]
    pub fn connected(user_id: UserId, session_id: SessionId, join_sequence: u64) -> Self {
        Self {
            user_id,
            session_id,
            connection_status: ConnectionStatus::Connected,
            status_in_party: PartyMemberStatus::NotReady,
            user_data: Vec::new(),
            local_players: Vec::new(),
            created_on_utc: Utc::now(),
            join_sequence,
            reserved_until: None,
        }
    }

    /// A reservation. Reservations get a placeholder session id until the
    /// user actually connects.
    #[must_use]
    pub fn reservation(user_id: UserId, join_sequence: u64, reserved_until: Instant) -> Self {
        Self {
            user_id,
            session_id: SessionId::new(),
            connection_status: ConnectionStatus::Reservation,
            status_in_party: PartyMemberStatus::NotReady,
            user_data: Vec::new(),
            local_players: Vec::new(),
            created_on_utc: Utc::now(),
            join_sequence,
            reserved_until: Some(reserved_until),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status_in_party == PartyMemberStatus::Ready
    }

    #[must_use]
    pub fn to_snapshot(&self, leader: &UserId) -> MemberSnapshot {
        MemberSnapshot {
            user_id: self.user_id.clone(),
            session_id: self.session_id,
            connection_status: self.connection_status,
            status_in_party: self.status_in_party,
            user_data: self.user_data.clone(),
            local_players: self.local_players.clone(),
            created_on_utc: self.created_on_utc,
            is_leader: &self.user_id == leader,
        }
    }
}

/// Wire view of a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub connection_status: ConnectionStatus,
    pub status_in_party: PartyMemberStatus,
    pub user_data: Vec<u8>,
    pub local_players: Vec<LocalPlayer>,
    pub created_on_utc: DateTime<Utc>,
    pub is_leader: bool,
}
