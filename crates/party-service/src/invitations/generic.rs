//! Generic fallback backend.
//!
//! Delivers the invitation as an [`InvitationRequest`] on a channel owned by
//! the transport layer, which forwards it to the recipient's session and
//! answers through `respond_to`.

use crate::errors::InvitationError;

use super::{InvitationBackend, InvitationContext};

use common::{PartyId, UserId};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Platform name of the fallback backend.
pub const GENERIC_PLATFORM: &str = "generic";

/// An invitation waiting for the recipient's answer.
#[derive(Debug)]
pub struct InvitationRequest {
    pub party_id: PartyId,
    pub sender: UserId,
    pub recipient: UserId,
    /// `true` = accepted.
    pub respond_to: oneshot::Sender<bool>,
}

pub struct GenericInvitationBackend {
    outbox: mpsc::Sender<InvitationRequest>,
}

impl GenericInvitationBackend {
    #[must_use]
    pub fn new(outbox: mpsc::Sender<InvitationRequest>) -> Self {
        Self { outbox }
    }

    /// Backend plus the receiving end the transport should drain.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<InvitationRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait::async_trait]
impl InvitationBackend for GenericInvitationBackend {
    fn platform_name(&self) -> &str {
        GENERIC_PLATFORM
    }

    fn priority(&self) -> i32 {
        i32::MIN
    }

    fn is_invitation_compatible_with(&self, _platform: &str) -> bool {
        true
    }

    fn can_send_invite_to_disconnected_player(&self) -> bool {
        false
    }

    async fn send_invitation(&self, context: InvitationContext) -> Result<bool, InvitationError> {
        let (tx, rx) = oneshot::channel();
        let request = InvitationRequest {
            party_id: context.party_id,
            sender: context.sender,
            recipient: context.recipient.user_id.clone(),
            respond_to: tx,
        };

        self.outbox
            .send(request)
            .await
            .map_err(|e| InvitationError::BackendUnavailable(e.to_string()))?;

        tokio::select! {
            () = context.cancel_token.cancelled() => {
                debug!(
                    target: "party.invitations",
                    recipient = %context.recipient.user_id,
                    "Generic invitation cancelled while waiting for answer"
                );
                Ok(false)
            }
            answer = rx => answer.map_err(|_| InvitationError::RecipientUnreachable),
        }
    }
}
