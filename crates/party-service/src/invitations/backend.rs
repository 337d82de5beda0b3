//! `InvitationBackend` - one way of delivering an invitation.

use crate::errors::InvitationError;

use super::InvitationRecipient;

use common::{PartyId, UserId};
use tokio_util::sync::CancellationToken;

/// Everything a backend needs to deliver one invitation.
#[derive(Debug, Clone)]
pub struct InvitationContext {
    pub party_id: PartyId,
    pub sender: UserId,
    pub recipient: InvitationRecipient,
    /// Fires when the sender cancels or the invitation is replaced.
    pub cancel_token: CancellationToken,
}

/// Strategy for one external platform (or the generic fallback).
///
/// Backends are tried in descending `priority()`; the first one whose
/// `is_invitation_compatible_with` accepts the recipient's platform is used.
#[async_trait::async_trait]
pub trait InvitationBackend: Send + Sync {
    /// Platform this backend serves.
    fn platform_name(&self) -> &str;

    /// Higher runs first. Ties are broken by platform name.
    fn priority(&self) -> i32 {
        0
    }

    fn is_invitation_compatible_with(&self, platform: &str) -> bool;

    /// Whether the recipient may be offline.
    fn can_send_invite_to_disconnected_player(&self) -> bool;

    /// Deliver the invitation. `Ok(true)` = accepted, `Ok(false)` = refused.
    /// Backends without a refusal concept resolve `Ok(true)` once delivered.
    async fn send_invitation(&self, context: InvitationContext) -> Result<bool, InvitationError>;
}
