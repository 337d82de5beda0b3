//! Party service error types.
//!
//! Error types map to client-visible error codes. Internal details are logged
//! server-side but never returned to clients.

use thiserror::Error;

/// Party service error type.
///
/// Maps to client error codes:
/// - `Unauthorized`: `UNAUTHORIZED` (2)
/// - `NotInParty`, `JoinDenied`: `FORBIDDEN` (3)
/// - `PartyNotFound`, `MemberNotFound`: `NOT_FOUND` (4)
/// - `Conflict`, `StaleSettings`, `NoGameFinder`, `InvalidOperation`: `CONFLICT` (5)
/// - `InvitationFailed`, `Internal`: `INTERNAL_ERROR` (6)
/// - `PartyFull`, `Draining`, `CapacityExceeded`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartyError {
    /// A non-leader attempted a leader-only operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The calling session is not a connected member of the party.
    #[error("Not in party")]
    NotInParty,

    /// A ready-status update was fenced on a settings version that is no longer current.
    #[error("Stale settings version: expected {expected}, current {current}")]
    StaleSettings { expected: u64, current: u64 },

    /// The party does not exist (or no longer exists).
    #[error("Party not found: {0}")]
    PartyNotFound(String),

    /// The targeted member is not in the party.
    #[error("Member not found: {0}")]
    MemberNotFound(String),

    /// The party reached its member cap.
    #[error("Party is full")]
    PartyFull,

    /// The connecting gate refused the peer.
    #[error("Join denied: {0}")]
    JoinDenied(String),

    /// Ready status requires a game finder to be configured.
    #[error("No game finder configured for the party")]
    NoGameFinder,

    /// Conflicting request (e.g. user already in party).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The request is well-formed but not applicable to the current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// An invitation backend failed.
    #[error("Invitation failed: {0}")]
    InvitationFailed(String),

    /// The registry refuses new parties (at capacity).
    #[error("Party capacity exceeded")]
    CapacityExceeded,

    /// The service is draining (graceful shutdown).
    #[error("Party service is draining")]
    Draining,

    /// Internal error (actor channel closed, task failed).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors reported by invitation backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvitationError {
    /// The backend could not reach the recipient.
    #[error("Recipient unreachable")]
    RecipientUnreachable,

    /// The backend's delivery channel is gone.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Platform-specific failure.
    #[error("Platform error: {0}")]
    Platform(String),
}

impl PartyError {
    /// Returns the client error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            PartyError::Unauthorized(_) => 2, // UNAUTHORIZED
            PartyError::NotInParty | PartyError::JoinDenied(_) => 3, // FORBIDDEN
            PartyError::PartyNotFound(_) | PartyError::MemberNotFound(_) => 4, // NOT_FOUND
            PartyError::Conflict(_)
            | PartyError::StaleSettings { .. }
            | PartyError::NoGameFinder
            | PartyError::InvalidOperation(_) => 5, // CONFLICT
            PartyError::InvitationFailed(_) | PartyError::Internal(_) => 6, // INTERNAL_ERROR
            PartyError::PartyFull | PartyError::CapacityExceeded | PartyError::Draining => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            PartyError::Unauthorized(_) => "Only the party leader can do this".to_string(),
            PartyError::NotInParty => "You are not in this party".to_string(),
            PartyError::StaleSettings { .. } => {
                "Party settings changed, please refresh the party state".to_string()
            }
            PartyError::PartyNotFound(_) => "Party not found".to_string(),
            PartyError::MemberNotFound(_) => "Member not found".to_string(),
            PartyError::PartyFull => "The party is full".to_string(),
            PartyError::JoinDenied(_) => "You cannot join this party".to_string(),
            PartyError::NoGameFinder => "The party has no game finder set".to_string(),
            PartyError::Conflict(msg) | PartyError::InvalidOperation(msg) => msg.clone(),
            PartyError::CapacityExceeded => "Server is at capacity, please try again".to_string(),
            PartyError::Draining => "Server is shutting down, please reconnect".to_string(),
            PartyError::InvitationFailed(_) => "The invitation could not be sent".to_string(),
            PartyError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Short, bounded label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            PartyError::Unauthorized(_) => "unauthorized",
            PartyError::NotInParty => "not_in_party",
            PartyError::StaleSettings { .. } => "stale_settings",
            PartyError::PartyNotFound(_) => "party_not_found",
            PartyError::MemberNotFound(_) => "member_not_found",
            PartyError::PartyFull => "party_full",
            PartyError::JoinDenied(_) => "join_denied",
            PartyError::NoGameFinder => "no_game_finder",
            PartyError::Conflict(_) => "conflict",
            PartyError::InvalidOperation(_) => "invalid_operation",
            PartyError::InvitationFailed(_) => "invitation_failed",
            PartyError::CapacityExceeded => "capacity_exceeded",
            PartyError::Draining => "draining",
            PartyError::Internal(_) => "internal",
        }
    }
}

impl From<InvitationError> for PartyError {
    fn from(err: InvitationError) -> Self {
        PartyError::InvitationFailed(err.to_string())
    }
}
