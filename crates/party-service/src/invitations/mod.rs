//! Invitations: one live invitation per (sender, recipient) pair, delivered
//! through pluggable platform backends or the generic fallback.
//!
//! Registration and completion run inside the party mailbox; only the
//! backend call itself runs outside it, so a slow platform never blocks the
//! party while a completion is still applied exactly once.
//!
//! - [`backend`] - the `InvitationBackend` strategy trait
//! - [`generic`] - fallback backend delivering through the party transport
//! - [`manager`] - backend selection and the pending-invitation map

pub mod backend;
pub mod generic;
pub mod manager;

pub use backend::{InvitationBackend, InvitationContext};
pub use generic::{GenericInvitationBackend, InvitationRequest, GENERIC_PLATFORM};
pub use manager::{InvitationManager, Registration};

use common::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Identifier of one invitation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvitationId(pub u64);

impl fmt::Display for InvitationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who is being invited and how they can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationRecipient {
    pub user_id: UserId,
    /// Platform of the recipient (e.g. "steam", "psn").
    pub platform: String,
    /// Whether the recipient currently has a session on this service.
    pub is_online: bool,
}

/// How an invitation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvitationOutcome {
    Accepted,
    Refused,
    /// Cancelled by the sender, replaced by a newer invitation, or the party ended.
    Cancelled,
    /// The backend failed.
    Failed(String),
}

impl InvitationOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            InvitationOutcome::Accepted => "accepted",
            InvitationOutcome::Refused => "refused",
            InvitationOutcome::Cancelled => "cancelled",
            InvitationOutcome::Failed(_) => "failed",
        }
    }
}

/// A live invitation, stored in `PartyState::pending_invitations`.
#[derive(Debug)]
pub struct Invitation {
    pub id: InvitationId,
    pub sender: UserId,
    pub recipient_id: UserId,
    /// Platform name of the backend handling it.
    pub backend: String,
    /// Child of the sender's token; cancelling either ends the invitation.
    cancel_token: CancellationToken,
    respond_to: Option<oneshot::Sender<InvitationOutcome>>,
}

impl Invitation {
    /// Cancel the backend call (idempotent).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Resolve the sender's pending future. Only the first call has an effect.
    pub fn resolve(&mut self, outcome: InvitationOutcome) {
        if let Some(tx) = self.respond_to.take() {
            let _ = tx.send(outcome);
        }
    }
}
