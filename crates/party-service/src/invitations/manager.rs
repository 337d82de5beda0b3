//! `InvitationManager` - backend selection and the pending-invitation map.
//!
//! The manager owns no state of its own besides the backend list: pending
//! invitations live in `PartyState` so that registration and completion are
//! serialized by the party mailbox like every other mutation.

use crate::errors::PartyError;
use crate::observability::metrics as prom;
use crate::state::{PartyConfiguration, PartyState};

use super::{
    Invitation, InvitationBackend, InvitationId, InvitationOutcome, InvitationRecipient,
};

use common::UserId;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A registered invitation, ready for its backend call.
pub struct Registration {
    pub id: InvitationId,
    pub backend: Arc<dyn InvitationBackend>,
    /// Token the backend call must honour.
    pub cancel_token: CancellationToken,
    /// Resolves when the invitation completes, is cancelled or replaced.
    pub outcome: oneshot::Receiver<InvitationOutcome>,
}

/// Cloned per party from a template built at startup.
#[derive(Clone)]
pub struct InvitationManager {
    /// Sorted by descending priority, then platform name.
    backends: Vec<Arc<dyn InvitationBackend>>,
    generic: Arc<dyn InvitationBackend>,
    next_id: u64,
}

impl InvitationManager {
    /// Create a manager. `generic` is used when forced or when no platform
    /// backend accepts the recipient.
    #[must_use]
    pub fn new(
        generic: Arc<dyn InvitationBackend>,
        mut backends: Vec<Arc<dyn InvitationBackend>>,
    ) -> Self {
        backends.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.platform_name().cmp(b.platform_name()))
        });
        Self {
            backends,
            generic,
            next_id: 0,
        }
    }

    /// Platform names in the order they are tried.
    #[must_use]
    pub fn backend_order(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.platform_name()).collect()
    }

    /// Whether `sender` may invite under the current settings.
    #[must_use]
    pub fn can_send_invitation(settings: &PartyConfiguration, sender: &UserId) -> bool {
        !settings.only_leader_can_invite || &settings.party_leader_id == sender
    }

    /// Pick the backend for `recipient`.
    ///
    /// # Errors
    ///
    /// `InvitationFailed` if no backend can reach the recipient (typically an
    /// offline recipient with only online-only backends).
    pub fn select_backend(
        &self,
        recipient: &InvitationRecipient,
        force_generic: bool,
    ) -> Result<Arc<dyn InvitationBackend>, PartyError> {
        let reachable = |backend: &Arc<dyn InvitationBackend>| {
            recipient.is_online || backend.can_send_invite_to_disconnected_player()
        };

        if !force_generic {
            if let Some(backend) = self.backends.iter().find(|b| {
                b.is_invitation_compatible_with(&recipient.platform) && reachable(b)
            }) {
                return Ok(Arc::clone(backend));
            }
        }

        if reachable(&self.generic) {
            Ok(Arc::clone(&self.generic))
        } else {
            Err(PartyError::InvitationFailed(format!(
                "No backend can reach offline recipient {}",
                recipient.user_id
            )))
        }
    }

    /// Store a new invitation from `sender` to `recipient`, cancelling and
    /// resolving any earlier one for the same pair.
    ///
    /// The invitation's token is a child of `sender_token`, so the sender
    /// cancelling also cancels the backend call.
    pub fn register(
        &mut self,
        state: &mut PartyState,
        sender: &UserId,
        recipient: &UserId,
        backend: Arc<dyn InvitationBackend>,
        sender_token: &CancellationToken,
    ) -> Registration {
        self.next_id += 1;
        let id = InvitationId(self.next_id);
        let cancel_token = sender_token.child_token();
        let (tx, rx) = oneshot::channel();

        let invitation = Invitation {
            id,
            sender: sender.clone(),
            recipient_id: recipient.clone(),
            backend: backend.platform_name().to_string(),
            cancel_token: cancel_token.clone(),
            respond_to: Some(tx),
        };

        let by_sender = state.pending_invitations.entry(recipient.clone()).or_default();
        if let Some(mut previous) = by_sender.insert(sender.clone(), invitation) {
            info!(
                target: "party.invitations",
                sender = %sender,
                recipient = %recipient,
                replaced = %previous.id,
                "Replacing pending invitation"
            );
            previous.cancel();
            prom::record_invitation(&previous.backend, InvitationOutcome::Cancelled.as_str());
            previous.resolve(InvitationOutcome::Cancelled);
        }

        Registration {
            id,
            backend,
            cancel_token,
            outcome: rx,
        }
    }

    /// Resolve invitation `id`. Returns `None` if it was already removed
    /// (replaced or cancelled), so each invitation completes at most once.
    pub fn complete(
        state: &mut PartyState,
        id: InvitationId,
        sender: &UserId,
        recipient: &UserId,
        outcome: InvitationOutcome,
    ) -> Option<InvitationOutcome> {
        let Entry::Occupied(mut by_sender) = state.pending_invitations.entry(recipient.clone())
        else {
            return None;
        };

        if by_sender.get().get(sender).map(|i| i.id) != Some(id) {
            debug!(
                target: "party.invitations",
                invitation = %id,
                "Ignoring completion of an invitation that is no longer pending"
            );
            return None;
        }

        let mut invitation = by_sender.get_mut().remove(sender)?;
        if by_sender.get().is_empty() {
            by_sender.remove();
        }

        prom::record_invitation(&invitation.backend, outcome.as_str());
        invitation.resolve(outcome.clone());
        Some(outcome)
    }

    /// Cancel and resolve every pending invitation sent by `sender`.
    pub fn cancel_from(state: &mut PartyState, sender: &UserId) -> usize {
        let mut cancelled = 0;
        state.pending_invitations.retain(|_, by_sender| {
            if let Some(mut invitation) = by_sender.remove(sender) {
                invitation.cancel();
                prom::record_invitation(&invitation.backend, InvitationOutcome::Cancelled.as_str());
                invitation.resolve(InvitationOutcome::Cancelled);
                cancelled += 1;
            }
            !by_sender.is_empty()
        });
        cancelled
    }

    /// Cancel and resolve everything (party disbanded).
    pub fn cancel_all(state: &mut PartyState) -> usize {
        let mut cancelled = 0;
        for (_, by_sender) in state.pending_invitations.drain() {
            for (_, mut invitation) in by_sender {
                invitation.cancel();
                prom::record_invitation(&invitation.backend, InvitationOutcome::Cancelled.as_str());
                invitation.resolve(InvitationOutcome::Cancelled);
                cancelled += 1;
            }
        }
        cancelled
    }
}
