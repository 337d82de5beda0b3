//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.
//!
//! Events pushed to clients (`PartyEvent`) and to server-side observers
//! (`PartyNotification`) are also defined here.

use crate::errors::PartyError;
use crate::invitations::{InvitationId, InvitationOutcome, InvitationRecipient};
use crate::state::{
    LocalPlayer, MemberSnapshot, PartyConfiguration, PartyMemberStatus, PartySettingsUpdate,
    PartySnapshot, PartyState,
};

use super::party::PartyActorHandle;

use common::{PartyId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A unit of work run against the party state inside the party's mailbox.
pub type UnitOfWork = Box<dyn FnOnce(&mut PartyState) + Send + 'static>;

/// Messages sent to `PartyRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Create a new party led by `leader`.
    CreateParty {
        leader: UserId,
        settings: PartySettingsUpdate,
        respond_to: oneshot::Sender<Result<PartyActorHandle, PartyError>>,
    },

    /// Get a handle to an existing party actor.
    GetParty {
        party_id: PartyId,
        respond_to: oneshot::Sender<Result<PartyActorHandle, PartyError>>,
    },

    /// Remove (disband) a party.
    RemoveParty {
        party_id: PartyId,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    /// Get current registry status (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Initiate graceful shutdown.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },
}

/// Messages sent to `PartyActor`. Each one is a unit of work executed
/// strictly one at a time, in submission order.
pub enum PartyMessage {
    /// A peer passed the transport's low-level accept and asks to join.
    PeerConnecting {
        session_id: SessionId,
        user_id: UserId,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    /// Another collaborator vetoes a pending peer.
    VetoPeer {
        session_id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// A pending peer finished its handshake and becomes a member.
    PeerConnected {
        session_id: SessionId,
        outbound: mpsc::Sender<PartyEnvelope>,
        respond_to: oneshot::Sender<Result<PartySnapshot, PartyError>>,
    },

    /// The transport lost a connection.
    PeerDisconnected { session_id: SessionId },

    /// Explicit leave request.
    Leave {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    /// Hold a slot for a user that has not connected yet.
    CreateReservation {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    /// Leader replaces the client-writable settings.
    UpdateSettings {
        session_id: SessionId,
        update: PartySettingsUpdate,
        respond_to: oneshot::Sender<Result<u64, PartyError>>,
    },

    /// A member sets its own ready status, optionally fenced on a settings version.
    UpdatePlayerStatus {
        session_id: SessionId,
        status: PartyMemberStatus,
        settings_version: Option<u64>,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    /// A member replaces its opaque user data.
    UpdateUserData {
        session_id: SessionId,
        user_data: Vec<u8>,
        local_players: Vec<LocalPlayer>,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    /// Leader hands leadership to another member.
    PromoteLeader {
        session_id: SessionId,
        new_leader: UserId,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    /// Leader removes a member.
    KickPlayer {
        session_id: SessionId,
        target: UserId,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    /// Push a full snapshot to the requesting member as a new message.
    SendPartyState {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },

    /// Answer the request itself with a full snapshot.
    GetPartyState {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<PartySnapshot, PartyError>>,
    },

    /// Whether `user_id` may invite under the current settings.
    CanSendInvitation {
        user_id: UserId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Register an invitation and start its backend call.
    SendInvitation {
        session_id: SessionId,
        recipient: InvitationRecipient,
        force_generic: bool,
        cancel_token: CancellationToken,
        respond_to: oneshot::Sender<Result<oneshot::Receiver<InvitationOutcome>, PartyError>>,
    },

    /// A backend call finished (accepted, refused, cancelled or failed).
    InvitationCompleted {
        invitation_id: InvitationId,
        sender: UserId,
        recipient: UserId,
        outcome: InvitationOutcome,
    },

    /// Server-side write of `PublicServerData`.
    UpdatePublicServerData {
        entries: BTreeMap<String, String>,
        respond_to: oneshot::Sender<u64>,
    },

    /// Generic unit of work (matchmaking reads, `ServerData` writes).
    Execute { work: UnitOfWork },

    /// Get current party status (for debugging/health).
    GetStatus {
        respond_to: oneshot::Sender<PartyStatus>,
    },

    /// Disband the party.
    Disband {
        reason: String,
        respond_to: oneshot::Sender<Result<(), PartyError>>,
    },
}

impl PartyMessage {
    /// Bounded label for metrics and logs.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            PartyMessage::PeerConnecting { .. } => "peer_connecting",
            PartyMessage::VetoPeer { .. } => "veto_peer",
            PartyMessage::PeerConnected { .. } => "peer_connected",
            PartyMessage::PeerDisconnected { .. } => "peer_disconnected",
            PartyMessage::Leave { .. } => "leave",
            PartyMessage::CreateReservation { .. } => "create_reservation",
            PartyMessage::UpdateSettings { .. } => "update_settings",
            PartyMessage::UpdatePlayerStatus { .. } => "update_player_status",
            PartyMessage::UpdateUserData { .. } => "update_user_data",
            PartyMessage::PromoteLeader { .. } => "promote_leader",
            PartyMessage::KickPlayer { .. } => "kick_player",
            PartyMessage::SendPartyState { .. } => "send_party_state",
            PartyMessage::GetPartyState { .. } => "get_party_state",
            PartyMessage::CanSendInvitation { .. } => "can_send_invitation",
            PartyMessage::SendInvitation { .. } => "send_invitation",
            PartyMessage::InvitationCompleted { .. } => "invitation_completed",
            PartyMessage::UpdatePublicServerData { .. } => "update_public_server_data",
            PartyMessage::Execute { .. } => "execute",
            PartyMessage::GetStatus { .. } => "get_status",
            PartyMessage::Disband { .. } => "disband",
        }
    }
}

impl std::fmt::Debug for PartyMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyMessage")
            .field("operation", &self.operation())
            .finish_non_exhaustive()
    }
}

/// Messages sent to `PeerActor`.
#[derive(Debug)]
pub enum PeerMessage {
    /// Deliver a party event to the connected client.
    Deliver { envelope: PartyEnvelope },

    /// Close the connection, telling the client why.
    Close { reason: DisconnectionReason },
}

// ----------------------------------------------------------------------------
// Client-facing payloads
// ----------------------------------------------------------------------------

/// Why a member left the party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectionReason {
    Left,
    Kicked,
}

impl DisconnectionReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DisconnectionReason::Left => "left",
            DisconnectionReason::Kicked => "kicked",
        }
    }
}

/// Event pushed to a member, with the ack requirement attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyEnvelope {
    /// When true the client must call `acknowledge` with the event's version.
    pub ack_required: bool,
    pub event: PartyEvent,
}

/// Broadcast routes. Versioned variants carry the party's `VersionNumber`
/// after the mutation they describe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "camelCase")]
pub enum PartyEvent {
    /// Member-status batch update (joins, ready changes, user data changes).
    #[serde(rename_all = "camelCase")]
    MembersUpdated {
        version_number: u64,
        members: Vec<MemberSnapshot>,
    },

    /// Settings snapshot, plus the users whose ready state this update reset.
    #[serde(rename_all = "camelCase")]
    SettingsUpdated {
        version_number: u64,
        settings_version_number: u64,
        settings: PartyConfiguration,
        ready_reset: Vec<UserId>,
    },

    /// Leadership moved to `leader_id`.
    #[serde(rename_all = "camelCase")]
    LeaderChanged {
        version_number: u64,
        leader_id: UserId,
    },

    /// A member left or was kicked.
    #[serde(rename_all = "camelCase")]
    MemberDisconnected {
        version_number: u64,
        user_id: UserId,
        reason: DisconnectionReason,
        new_leader: Option<UserId>,
        ready_reset: Vec<UserId>,
    },

    /// Full state, sent on request.
    FullState(PartySnapshot),

    /// Sent to a peer whose connection the party closes.
    Disconnected { reason: DisconnectionReason },

    /// The party no longer exists.
    Disbanded { reason: String },
}

impl PartyEvent {
    /// Version tag of incremental events. `None` for snapshots and terminal events.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        match self {
            PartyEvent::MembersUpdated { version_number, .. }
            | PartyEvent::SettingsUpdated { version_number, .. }
            | PartyEvent::LeaderChanged { version_number, .. }
            | PartyEvent::MemberDisconnected { version_number, .. } => Some(*version_number),
            PartyEvent::FullState(_) | PartyEvent::Disconnected { .. } | PartyEvent::Disbanded { .. } => {
                None
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Server-side observers
// ----------------------------------------------------------------------------

/// Notifications for server-side collaborators (matchmaking, game-session flows).
#[derive(Debug, Clone)]
pub enum PartyNotification {
    /// Every connected member is ready.
    AllMembersReady(PartySnapshot),
    /// The party was all-ready and no longer is.
    ReadyCancelled { version_number: u64 },
    /// Settings changed (consumers re-read `game_finder_name` / `custom_data`).
    SettingsChanged(PartySnapshot),
    /// A member left the party.
    MemberLeft {
        user_id: UserId,
        reason: DisconnectionReason,
    },
    /// The party is gone.
    Disbanded { party_id: PartyId },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Status of the `PartyRegistryActor`.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    /// Total active parties.
    pub party_count: usize,
    /// Members across all parties, reservations included.
    pub member_count: usize,
    /// Live peer connections.
    pub peer_count: usize,
    /// Whether the registry is draining.
    pub is_draining: bool,
    /// Current mailbox depth.
    pub mailbox_depth: usize,
}

/// Current status of a party (for debugging/health).
#[derive(Debug, Clone)]
pub struct PartyStatus {
    pub party_id: PartyId,
    pub leader_id: UserId,
    pub version_number: u64,
    pub settings_version_number: u64,
    /// Members including reservations.
    pub member_count: usize,
    pub connected_count: usize,
    pub pending_peers: usize,
    pub pending_invitations: usize,
    pub mailbox_depth: usize,
    pub is_disbanding: bool,
}
