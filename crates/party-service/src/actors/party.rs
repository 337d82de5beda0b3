//! `PartyActor` - per-party actor that owns the party state.
//!
//! Each `PartyActor`:
//! - Owns the `PartyState` of one party; its mailbox is the party's mutation
//!   queue, so units of work run one at a time in submission order
//! - Supervises one `PeerActor` per connected member
//! - Pushes a version-tagged event after every committed mutation
//! - Registers invitations and applies their completion
//!
//! # Acknowledgment freeze
//!
//! With `AckPolicy::require_ack`, after a broadcast the actor answers the
//! caller and then waits (bounded by the ack timeout) for every member that
//! received the event to acknowledge it. Acks arrive on a separate channel;
//! the mailbox is not polled while waiting, so queued operations wait in line.
//!
//! # Lifecycle
//!
//! The party is created with a reservation for its leader. It stops when it
//! has no member left (reservations included), when it is disbanded, or when
//! its token is cancelled.

use crate::config::{PartyOptions, ResetTrigger};
use crate::errors::PartyError;
use crate::invitations::{
    InvitationContext, InvitationManager, InvitationOutcome, InvitationRecipient,
};
use crate::observability::metrics as prom;
use crate::state::{
    ConnectionStatus, LocalPlayer, PartyConfiguration, PartyMember, PartyMemberStatus,
    PartySettingsUpdate, PartySnapshot, PartyState, PendingPeer,
};
use crate::sync::{drain_stale_acks, wait_for_acks, Ack, AckOutcome};

use super::messages::{
    DisconnectionReason, PartyEnvelope, PartyEvent, PartyMessage, PartyNotification, PartyStatus,
    UnitOfWork,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::peer::{PeerActor, PeerActorHandle};

use common::{PartyId, SessionId, UserId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Party mailbox size.
const PARTY_CHANNEL_BUFFER: usize = 256;

/// Ack channel size. Acks beyond this are dropped and count as missing.
const ACK_CHANNEL_BUFFER: usize = 64;

/// Observer channel size. Slow observers lag and skip notifications.
const NOTIFICATION_BUFFER: usize = 64;

/// How often reservations are checked for expiry.
const RESERVATION_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a `PartyActor`.
#[derive(Clone, Debug)]
pub struct PartyActorHandle {
    sender: mpsc::Sender<PartyMessage>,
    ack_sender: mpsc::Sender<Ack>,
    notifications: broadcast::Sender<PartyNotification>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    party_id: PartyId,
}

impl PartyActorHandle {
    #[must_use]
    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    /// Subscribe to server-side notifications (matchmaking, game-session flows).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PartyNotification> {
        self.notifications.subscribe()
    }

    async fn send(&self, message: PartyMessage) -> Result<(), PartyError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| PartyError::PartyNotFound(self.party_id.to_string()))?;
        self.mailbox.record_enqueue();
        Ok(())
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> PartyMessage,
    ) -> Result<T, PartyError> {
        let (tx, rx) = oneshot::channel();
        self.send(message(tx)).await?;
        rx.await
            .map_err(|e| PartyError::Internal(format!("response receive failed: {e}")))
    }

    /// Connecting gate: admit `session_id` into the pending peers.
    pub async fn peer_connecting(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<(), PartyError> {
        self.request(|respond_to| PartyMessage::PeerConnecting {
            session_id,
            user_id,
            respond_to,
        })
        .await?
    }

    /// Veto a pending peer. Returns whether the peer was pending.
    pub async fn veto_peer(&self, session_id: SessionId) -> Result<bool, PartyError> {
        self.request(|respond_to| PartyMessage::VetoPeer {
            session_id,
            respond_to,
        })
        .await
    }

    /// Promote a pending peer to a connected member. Events for the member
    /// are pushed to `outbound`. Returns the state right after the join.
    pub async fn peer_connected(
        &self,
        session_id: SessionId,
        outbound: mpsc::Sender<PartyEnvelope>,
    ) -> Result<PartySnapshot, PartyError> {
        self.request(|respond_to| PartyMessage::PeerConnected {
            session_id,
            outbound,
            respond_to,
        })
        .await?
    }

    /// The transport lost the connection of `session_id`.
    pub async fn peer_disconnected(&self, session_id: SessionId) -> Result<(), PartyError> {
        self.send(PartyMessage::PeerDisconnected { session_id })
            .await
    }

    pub async fn leave(&self, session_id: SessionId) -> Result<(), PartyError> {
        self.request(|respond_to| PartyMessage::Leave {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Hold a slot for `user_id` until it connects or the reservation expires.
    pub async fn create_reservation(&self, user_id: UserId) -> Result<(), PartyError> {
        self.request(|respond_to| PartyMessage::CreateReservation {
            user_id,
            respond_to,
        })
        .await?
    }

    /// Leader-only. Returns the new `SettingsVersionNumber`.
    pub async fn update_settings(
        &self,
        session_id: SessionId,
        update: PartySettingsUpdate,
    ) -> Result<u64, PartyError> {
        self.request(|respond_to| PartyMessage::UpdateSettings {
            session_id,
            update,
            respond_to,
        })
        .await?
    }

    /// Set the caller's own ready status. With `settings_version` set, the
    /// update is rejected as stale if the settings changed since.
    pub async fn update_player_status(
        &self,
        session_id: SessionId,
        status: PartyMemberStatus,
        settings_version: Option<u64>,
    ) -> Result<(), PartyError> {
        self.request(|respond_to| PartyMessage::UpdatePlayerStatus {
            session_id,
            status,
            settings_version,
            respond_to,
        })
        .await?
    }

    pub async fn update_user_data(
        &self,
        session_id: SessionId,
        user_data: Vec<u8>,
        local_players: Vec<LocalPlayer>,
    ) -> Result<(), PartyError> {
        self.request(|respond_to| PartyMessage::UpdateUserData {
            session_id,
            user_data,
            local_players,
            respond_to,
        })
        .await?
    }

    /// Leader-only.
    pub async fn promote_leader(
        &self,
        session_id: SessionId,
        new_leader: UserId,
    ) -> Result<(), PartyError> {
        self.request(|respond_to| PartyMessage::PromoteLeader {
            session_id,
            new_leader,
            respond_to,
        })
        .await?
    }

    /// Leader-only.
    pub async fn kick_player(&self, session_id: SessionId, target: UserId) -> Result<(), PartyError> {
        self.request(|respond_to| PartyMessage::KickPlayer {
            session_id,
            target,
            respond_to,
        })
        .await?
    }

    /// Push a full snapshot to the caller's connection as a new message.
    pub async fn send_party_state(&self, session_id: SessionId) -> Result<(), PartyError> {
        self.request(|respond_to| PartyMessage::SendPartyState {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Full snapshot as the answer to the request.
    pub async fn get_party_state(&self, session_id: SessionId) -> Result<PartySnapshot, PartyError> {
        self.request(|respond_to| PartyMessage::GetPartyState {
            session_id,
            respond_to,
        })
        .await?
    }

    pub async fn can_send_invitation(&self, user_id: UserId) -> Result<bool, PartyError> {
        self.request(|respond_to| PartyMessage::CanSendInvitation {
            user_id,
            respond_to,
        })
        .await
    }

    /// Invite `recipient`. Resolves `true` when accepted, `false` when
    /// refused or cancelled (through `cancel_token`, a newer invitation to the
    /// same recipient, or the party ending).
    ///
    /// # Errors
    ///
    /// Rejections (not in party, not allowed to invite, no reachable backend)
    /// and backend failures.
    pub async fn send_invitation(
        &self,
        session_id: SessionId,
        recipient: InvitationRecipient,
        force_generic: bool,
        cancel_token: CancellationToken,
    ) -> Result<bool, PartyError> {
        let outcome = self
            .request(|respond_to| PartyMessage::SendInvitation {
                session_id,
                recipient,
                force_generic,
                cancel_token,
                respond_to,
            })
            .await??;

        // Awaited outside the party queue
        match outcome.await {
            Ok(InvitationOutcome::Accepted) => Ok(true),
            Ok(InvitationOutcome::Refused | InvitationOutcome::Cancelled) => Ok(false),
            Ok(InvitationOutcome::Failed(reason)) => Err(PartyError::InvitationFailed(reason)),
            Err(_) => Err(PartyError::PartyNotFound(self.party_id.to_string())),
        }
    }

    /// Server-side write of `PublicServerData`. Returns the new `VersionNumber`.
    pub async fn update_public_server_data(
        &self,
        entries: BTreeMap<String, String>,
    ) -> Result<u64, PartyError> {
        self.request(|respond_to| PartyMessage::UpdatePublicServerData {
            entries,
            respond_to,
        })
        .await
    }

    /// Run `work` against the party state inside the mutation queue.
    ///
    /// A unit of work that panics fails with `Internal` and does not stop
    /// the queue.
    pub async fn enqueue<T, F>(&self, work: F) -> Result<T, PartyError>
    where
        F: FnOnce(&mut PartyState) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let work: UnitOfWork = Box::new(move |state| {
            let _ = tx.send(work(state));
        });
        self.send(PartyMessage::Execute { work }).await?;
        rx.await
            .map_err(|_| PartyError::Internal("unit of work failed".to_string()))
    }

    /// Acknowledge the broadcast tagged `version`. Never waits on the party.
    pub fn acknowledge(&self, session_id: SessionId, version: u64) -> Result<(), PartyError> {
        match self.ack_sender.try_send(Ack {
            session_id,
            version,
        }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(
                    target: "party.sync",
                    party_id = %self.party_id,
                    session_id = %session_id,
                    "Ack channel full, dropping acknowledgment"
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(PartyError::PartyNotFound(self.party_id.to_string()))
            }
        }
    }

    pub async fn get_status(&self) -> Result<PartyStatus, PartyError> {
        self.request(|respond_to| PartyMessage::GetStatus { respond_to })
            .await
    }

    /// Notify every member, cancel pending invitations and stop the party.
    pub async fn disband(&self, reason: String) -> Result<(), PartyError> {
        self.request(|respond_to| PartyMessage::Disband { reason, respond_to })
            .await?
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A supervised peer.
struct ManagedPeer {
    handle: PeerActorHandle,
    task_handle: JoinHandle<()>,
}

/// Broadcast waiting for acknowledgments.
struct PendingAck {
    version: u64,
    expected: HashSet<SessionId>,
}

pub struct PartyActor {
    party_id: PartyId,
    receiver: mpsc::Receiver<PartyMessage>,
    /// Lets invitation tasks report back without keeping the party alive.
    self_sender: mpsc::WeakSender<PartyMessage>,
    ack_receiver: mpsc::Receiver<Ack>,
    notifications: broadcast::Sender<PartyNotification>,
    /// Child of the registry's token.
    cancel_token: CancellationToken,
    state: PartyState,
    options: PartyOptions,
    invitations: InvitationManager,
    peers: HashMap<SessionId, ManagedPeer>,
    pending_ack: Option<PendingAck>,
    /// Last all-ready state reported to observers.
    all_ready: bool,
    is_disbanding: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl PartyActor {
    /// Spawn a party led by `leader`, who gets a reservation.
    pub fn spawn(
        party_id: PartyId,
        leader: UserId,
        settings: PartySettingsUpdate,
        options: PartyOptions,
        invitations: InvitationManager,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (PartyActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(PARTY_CHANNEL_BUFFER);
        let (ack_sender, ack_receiver) = mpsc::channel(ACK_CHANNEL_BUFFER);
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let mailbox = MailboxMonitor::new(ActorType::Party, party_id.to_string());

        let mut state = PartyState::new(PartyConfiguration::new(party_id, leader.clone(), settings));
        let sequence = state.next_join_sequence();
        let reservation =
            PartyMember::reservation(leader, sequence, Instant::now() + options.reservation_ttl);
        state.members.insert(reservation.session_id, reservation);

        metrics.party_created();
        metrics.member_joined();

        let actor = Self {
            party_id,
            receiver,
            self_sender: sender.downgrade(),
            ack_receiver,
            notifications: notifications.clone(),
            cancel_token: cancel_token.clone(),
            state,
            options,
            invitations,
            peers: HashMap::new(),
            pending_ack: None,
            all_ready: false,
            is_disbanding: false,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PartyActorHandle {
            sender,
            ack_sender,
            notifications,
            cancel_token,
            mailbox,
            party_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "party.actor.party", fields(party_id = %self.party_id))]
    async fn run(mut self) {
        info!(
            target: "party.actor.party",
            party_id = %self.party_id,
            leader = %self.state.settings.party_leader_id,
            "PartyActor started"
        );

        let mut reservation_check = tokio::time::interval(RESERVATION_CHECK_INTERVAL);
        reservation_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            self.check_peer_health().await;
            self.await_acks().await;

            if self.is_disbanding || self.state.members.is_empty() {
                break;
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "party.actor.party",
                        party_id = %self.party_id,
                        "PartyActor received cancellation signal"
                    );
                    self.disband("shutdown").await;
                    break;
                }

                _ = reservation_check.tick() => {
                    self.expire_reservations().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            self.handle_message(message).await;
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "party.actor.party",
                                party_id = %self.party_id,
                                "PartyActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.stop();
    }

    /// Handle a single message, then freeze for acks if it broadcast.
    async fn handle_message(&mut self, message: PartyMessage) {
        let operation = message.operation();
        let started = Instant::now();

        let status = match message {
            PartyMessage::PeerConnecting {
                session_id,
                user_id,
                respond_to,
            } => {
                let result = self.handle_peer_connecting(session_id, user_id);
                respond(respond_to, result)
            }

            PartyMessage::VetoPeer {
                session_id,
                respond_to,
            } => {
                let vetoed = self.state.pending_accepted_peers.remove(&session_id).is_some();
                if vetoed {
                    debug!(
                        target: "party.actor.party",
                        party_id = %self.party_id,
                        session_id = %session_id,
                        "Pending peer vetoed"
                    );
                }
                let _ = respond_to.send(vetoed);
                "success"
            }

            PartyMessage::PeerConnected {
                session_id,
                outbound,
                respond_to,
            } => {
                let result = self.handle_peer_connected(session_id, outbound);
                respond(respond_to, result)
            }

            PartyMessage::PeerDisconnected { session_id } => {
                self.handle_peer_disconnected(session_id).await;
                "success"
            }

            PartyMessage::Leave {
                session_id,
                respond_to,
            } => {
                let result = self.handle_leave(session_id).await;
                respond(respond_to, result)
            }

            PartyMessage::CreateReservation {
                user_id,
                respond_to,
            } => {
                let result = self.handle_create_reservation(user_id);
                respond(respond_to, result)
            }

            PartyMessage::UpdateSettings {
                session_id,
                update,
                respond_to,
            } => {
                let result = self.handle_update_settings(session_id, update);
                respond(respond_to, result)
            }

            PartyMessage::UpdatePlayerStatus {
                session_id,
                status,
                settings_version,
                respond_to,
            } => {
                let result = self.handle_update_player_status(session_id, status, settings_version);
                respond(respond_to, result)
            }

            PartyMessage::UpdateUserData {
                session_id,
                user_data,
                local_players,
                respond_to,
            } => {
                let result = self.handle_update_user_data(session_id, user_data, local_players);
                respond(respond_to, result)
            }

            PartyMessage::PromoteLeader {
                session_id,
                new_leader,
                respond_to,
            } => {
                let result = self.handle_promote_leader(session_id, new_leader);
                respond(respond_to, result)
            }

            PartyMessage::KickPlayer {
                session_id,
                target,
                respond_to,
            } => {
                let result = self.handle_kick_player(session_id, target).await;
                respond(respond_to, result)
            }

            PartyMessage::SendPartyState {
                session_id,
                respond_to,
            } => {
                let result = self.handle_send_party_state(session_id);
                respond(respond_to, result)
            }

            PartyMessage::GetPartyState {
                session_id,
                respond_to,
            } => {
                let result = self
                    .state
                    .connected_member(&session_id)
                    .map(|_| self.state.snapshot());
                respond(respond_to, result)
            }

            PartyMessage::CanSendInvitation {
                user_id,
                respond_to,
            } => {
                let allowed = InvitationManager::can_send_invitation(&self.state.settings, &user_id);
                let _ = respond_to.send(allowed);
                "success"
            }

            PartyMessage::SendInvitation {
                session_id,
                recipient,
                force_generic,
                cancel_token,
                respond_to,
            } => {
                let result =
                    self.handle_send_invitation(session_id, recipient, force_generic, &cancel_token);
                respond(respond_to, result)
            }

            PartyMessage::InvitationCompleted {
                invitation_id,
                sender,
                recipient,
                outcome,
            } => {
                if let Some(outcome) = InvitationManager::complete(
                    &mut self.state,
                    invitation_id,
                    &sender,
                    &recipient,
                    outcome,
                ) {
                    info!(
                        target: "party.invitations",
                        party_id = %self.party_id,
                        invitation = %invitation_id,
                        sender = %sender,
                        recipient = %recipient,
                        outcome = outcome.as_str(),
                        "Invitation completed"
                    );
                    if outcome == InvitationOutcome::Accepted {
                        self.reserve_for_accepted_invitation(recipient);
                    }
                }
                "success"
            }

            PartyMessage::UpdatePublicServerData {
                entries,
                respond_to,
            } => {
                let version = self.handle_update_public_server_data(entries);
                let _ = respond_to.send(version);
                "success"
            }

            PartyMessage::Execute { work } => {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| work(&mut self.state)));
                if outcome.is_err() {
                    self.metrics.record_panic(ActorType::Party);
                    error!(
                        target: "party.actor.party",
                        party_id = %self.party_id,
                        "Unit of work panicked, continuing with the next one"
                    );
                    "internal"
                } else {
                    "success"
                }
            }

            PartyMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
                "success"
            }

            PartyMessage::Disband { reason, respond_to } => {
                self.disband(&reason).await;
                let _ = respond_to.send(Ok(()));
                "success"
            }
        };

        prom::record_mutation(operation, status, started.elapsed());
    }

    // ------------------------------------------------------------------------
    // Join flow
    // ------------------------------------------------------------------------

    fn handle_peer_connecting(
        &mut self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<(), PartyError> {
        if self.state.members.contains_key(&session_id)
            || self.state.pending_accepted_peers.contains_key(&session_id)
        {
            return Err(PartyError::Conflict("Session already connecting".to_string()));
        }
        if self
            .state
            .pending_accepted_peers
            .values()
            .any(|p| p.user_id == user_id)
        {
            return Err(PartyError::Conflict("User already connecting".to_string()));
        }

        let has_reservation = match self.state.member_by_user(&user_id) {
            Some(member) if member.connection_status == ConnectionStatus::Reservation => true,
            Some(_) => return Err(PartyError::Conflict("User already in party".to_string())),
            None => false,
        };

        if !has_reservation {
            let settings = &self.state.settings;
            if !settings.is_joinable {
                return Err(PartyError::JoinDenied("Party is not joinable".to_string()));
            }
            if !settings.is_public && !self.state.has_pending_invitation_for(&user_id) {
                return Err(PartyError::JoinDenied(
                    "Party is private and the user was not invited".to_string(),
                ));
            }
            if self.state.occupied_slots() >= self.member_cap() {
                return Err(PartyError::PartyFull);
            }
        }

        debug!(
            target: "party.actor.party",
            party_id = %self.party_id,
            session_id = %session_id,
            user_id = %user_id,
            has_reservation = has_reservation,
            "Peer passed connecting gate"
        );

        self.state.pending_accepted_peers.insert(
            session_id,
            PendingPeer {
                session_id,
                user_id,
            },
        );
        Ok(())
    }

    fn handle_peer_connected(
        &mut self,
        session_id: SessionId,
        outbound: mpsc::Sender<PartyEnvelope>,
    ) -> Result<PartySnapshot, PartyError> {
        let pending = self
            .state
            .pending_accepted_peers
            .remove(&session_id)
            .ok_or_else(|| {
                PartyError::InvalidOperation("Peer did not pass the connecting gate".to_string())
            })?;
        let user_id = pending.user_id;

        // Claim the reservation, keeping its join order
        let reservation = self
            .state
            .members
            .values()
            .find(|m| m.user_id == user_id && m.connection_status == ConnectionStatus::Reservation)
            .map(|m| (m.session_id, m.join_sequence));
        let join_sequence = if let Some((placeholder, sequence)) = reservation {
            self.state.members.remove(&placeholder);
            sequence
        } else {
            self.metrics.member_joined();
            self.state.next_join_sequence()
        };

        self.state.members.insert(
            session_id,
            PartyMember::connected(user_id.clone(), session_id, join_sequence),
        );

        let (handle, task_handle) = PeerActor::spawn(
            session_id,
            user_id.clone(),
            self.party_id,
            outbound,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        self.peers.insert(
            session_id,
            ManagedPeer {
                handle,
                task_handle,
            },
        );

        let version = self.state.commit();
        let mut changed = BTreeSet::from([user_id.clone()]);
        changed.extend(self.reset_ready_if(ResetTrigger::MemberListChanged));

        info!(
            target: "party.actor.party",
            party_id = %self.party_id,
            session_id = %session_id,
            user_id = %user_id,
            version = version,
            members = self.state.members.len(),
            "Member connected"
        );

        self.broadcast(PartyEvent::MembersUpdated {
            version_number: version,
            members: self.state.member_batch(&changed),
        });
        self.refresh_ready_notifications();

        Ok(self.state.snapshot())
    }

    async fn handle_peer_disconnected(&mut self, session_id: SessionId) {
        if self.state.pending_accepted_peers.remove(&session_id).is_some() {
            debug!(
                target: "party.actor.party",
                party_id = %self.party_id,
                session_id = %session_id,
                "Pending peer disconnected before joining"
            );
            return;
        }

        if let Some(peer) = self.peers.remove(&session_id) {
            peer.handle.cancel();
        }
        if self.state.member(&session_id).is_some() {
            self.remove_member(session_id, DisconnectionReason::Left).await;
        }
    }

    async fn handle_leave(&mut self, session_id: SessionId) -> Result<(), PartyError> {
        self.state.connected_member(&session_id)?;
        self.remove_member(session_id, DisconnectionReason::Left).await;
        Ok(())
    }

    fn handle_create_reservation(&mut self, user_id: UserId) -> Result<(), PartyError> {
        if self.state.member_by_user(&user_id).is_some()
            || self
                .state
                .pending_accepted_peers
                .values()
                .any(|p| p.user_id == user_id)
        {
            return Err(PartyError::Conflict("User already in party".to_string()));
        }
        if self.state.occupied_slots() >= self.member_cap() {
            return Err(PartyError::PartyFull);
        }

        self.insert_reservation(user_id);
        Ok(())
    }

    fn insert_reservation(&mut self, user_id: UserId) {
        let sequence = self.state.next_join_sequence();
        let reservation = PartyMember::reservation(
            user_id.clone(),
            sequence,
            Instant::now() + self.options.reservation_ttl,
        );
        self.state.members.insert(reservation.session_id, reservation);
        self.metrics.member_joined();

        let version = self.state.commit();
        debug!(
            target: "party.actor.party",
            party_id = %self.party_id,
            user_id = %user_id,
            version = version,
            "Reservation created"
        );

        self.broadcast(PartyEvent::MembersUpdated {
            version_number: version,
            members: self.state.member_batch(&BTreeSet::from([user_id])),
        });
    }

    fn reserve_for_accepted_invitation(&mut self, recipient: UserId) {
        let already_joining = self.state.member_by_user(&recipient).is_some()
            || self
                .state
                .pending_accepted_peers
                .values()
                .any(|p| p.user_id == recipient);
        if already_joining {
            return;
        }
        if self.state.occupied_slots() >= self.member_cap() {
            warn!(
                target: "party.invitations",
                party_id = %self.party_id,
                recipient = %recipient,
                "Invitation accepted but the party is full, no reservation created"
            );
            return;
        }
        self.insert_reservation(recipient);
    }

    async fn expire_reservations(&mut self) {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .state
            .members
            .values()
            .filter(|m| {
                m.connection_status == ConnectionStatus::Reservation
                    && m.reserved_until.is_some_and(|until| until <= now)
            })
            .map(|m| m.session_id)
            .collect();

        for session_id in expired {
            info!(
                target: "party.actor.party",
                party_id = %self.party_id,
                session_id = %session_id,
                "Reservation expired"
            );
            self.remove_member(session_id, DisconnectionReason::Left).await;
        }
    }

    /// Remove a member (connected or reserved), hand over leadership if
    /// needed, and broadcast the departure.
    async fn remove_member(&mut self, session_id: SessionId, reason: DisconnectionReason) {
        let Some(member) = self.state.members.remove(&session_id) else {
            return;
        };
        self.metrics.member_left();

        if let Some(peer) = self.peers.remove(&session_id) {
            peer.handle.close(reason);
        }

        let cancelled = InvitationManager::cancel_from(&mut self.state, &member.user_id);
        if cancelled > 0 {
            debug!(
                target: "party.invitations",
                party_id = %self.party_id,
                sender = %member.user_id,
                cancelled = cancelled,
                "Cancelled invitations of departing member"
            );
        }

        let new_leader = if self.state.is_leader(&member.user_id) {
            let next = self.state.next_leader(&member.user_id);
            if let Some(next) = &next {
                self.state.settings.party_leader_id = next.clone();
            }
            next
        } else {
            None
        };

        let version = self.state.commit();
        let ready_reset = self.reset_ready_if(ResetTrigger::MemberListChanged);

        info!(
            target: "party.actor.party",
            party_id = %self.party_id,
            user_id = %member.user_id,
            reason = reason.as_str(),
            new_leader = ?new_leader,
            version = version,
            remaining = self.state.members.len(),
            "Member removed"
        );

        self.broadcast(PartyEvent::MemberDisconnected {
            version_number: version,
            user_id: member.user_id.clone(),
            reason,
            new_leader,
            ready_reset,
        });
        self.notify(PartyNotification::MemberLeft {
            user_id: member.user_id,
            reason,
        });
        self.refresh_ready_notifications();
    }

    // ------------------------------------------------------------------------
    // Member operations
    // ------------------------------------------------------------------------

    fn handle_update_settings(
        &mut self,
        session_id: SessionId,
        update: PartySettingsUpdate,
    ) -> Result<u64, PartyError> {
        self.state.require_leader(&session_id)?;

        match update.max_members() {
            Ok(Some(cap)) if cap < self.state.occupied_slots() => {
                return Err(PartyError::InvalidOperation(format!(
                    "Member cap {cap} is below the current member count"
                )));
            }
            Ok(_) => {}
            Err(raw) => {
                return Err(PartyError::InvalidOperation(format!(
                    "Invalid member cap: {raw}"
                )));
            }
        }

        self.state.settings.apply(update);
        let (version, settings_version) = self.state.commit_settings();
        let ready_reset = self.reset_ready_if(ResetTrigger::SettingsUpdated);

        info!(
            target: "party.actor.party",
            party_id = %self.party_id,
            version = version,
            settings_version = settings_version,
            ready_reset = ready_reset.len(),
            "Settings updated"
        );

        self.broadcast(PartyEvent::SettingsUpdated {
            version_number: version,
            settings_version_number: settings_version,
            settings: self.state.settings.clone(),
            ready_reset,
        });
        self.notify(PartyNotification::SettingsChanged(self.state.snapshot()));
        self.refresh_ready_notifications();

        Ok(settings_version)
    }

    fn handle_update_player_status(
        &mut self,
        session_id: SessionId,
        status: PartyMemberStatus,
        settings_version: Option<u64>,
    ) -> Result<(), PartyError> {
        let member = self.state.connected_member(&session_id)?;

        if let Some(expected) = settings_version {
            let current = self.state.settings_version_number;
            if expected != current {
                return Err(PartyError::StaleSettings { expected, current });
            }
        }
        if status == PartyMemberStatus::Ready && self.state.settings.game_finder_name.is_empty() {
            return Err(PartyError::NoGameFinder);
        }
        if member.status_in_party == status {
            return Ok(());
        }

        let user_id = member.user_id.clone();
        if let Some(member) = self.state.members.get_mut(&session_id) {
            member.status_in_party = status;
        }
        let version = self.state.commit();

        debug!(
            target: "party.actor.party",
            party_id = %self.party_id,
            user_id = %user_id,
            status = ?status,
            version = version,
            "Player status updated"
        );

        self.broadcast(PartyEvent::MembersUpdated {
            version_number: version,
            members: self.state.member_batch(&BTreeSet::from([user_id])),
        });
        self.refresh_ready_notifications();
        Ok(())
    }

    fn handle_update_user_data(
        &mut self,
        session_id: SessionId,
        user_data: Vec<u8>,
        local_players: Vec<LocalPlayer>,
    ) -> Result<(), PartyError> {
        let user_id = self.state.connected_member(&session_id)?.user_id.clone();

        if let Some(member) = self.state.members.get_mut(&session_id) {
            member.user_data = user_data;
            member.local_players = local_players;
        }
        let version = self.state.commit();

        let mut changed = BTreeSet::from([user_id.clone()]);
        changed.extend(self.reset_ready_if(ResetTrigger::MemberDataUpdated));

        debug!(
            target: "party.actor.party",
            party_id = %self.party_id,
            user_id = %user_id,
            version = version,
            "User data updated"
        );

        self.broadcast(PartyEvent::MembersUpdated {
            version_number: version,
            members: self.state.member_batch(&changed),
        });
        self.refresh_ready_notifications();
        Ok(())
    }

    fn handle_promote_leader(
        &mut self,
        session_id: SessionId,
        new_leader: UserId,
    ) -> Result<(), PartyError> {
        self.state.require_leader(&session_id)?;

        let target = self
            .state
            .member_by_user(&new_leader)
            .filter(|m| m.is_connected())
            .ok_or_else(|| PartyError::MemberNotFound(new_leader.to_string()))?;
        if self.state.is_leader(&target.user_id) {
            return Ok(());
        }

        self.state.settings.party_leader_id = new_leader.clone();
        let version = self.state.commit();

        info!(
            target: "party.actor.party",
            party_id = %self.party_id,
            new_leader = %new_leader,
            version = version,
            "Leader promoted"
        );

        self.broadcast(PartyEvent::LeaderChanged {
            version_number: version,
            leader_id: new_leader,
        });
        Ok(())
    }

    async fn handle_kick_player(
        &mut self,
        session_id: SessionId,
        target: UserId,
    ) -> Result<(), PartyError> {
        let leader = self.state.require_leader(&session_id)?;
        if leader.user_id == target {
            return Err(PartyError::InvalidOperation(
                "The leader cannot kick themselves".to_string(),
            ));
        }

        let target_session = self
            .state
            .session_of(&target)
            .ok_or_else(|| PartyError::MemberNotFound(target.to_string()))?;

        self.remove_member(target_session, DisconnectionReason::Kicked)
            .await;
        Ok(())
    }

    fn handle_send_party_state(&self, session_id: SessionId) -> Result<(), PartyError> {
        self.state.connected_member(&session_id)?;
        let peer = self
            .peers
            .get(&session_id)
            .ok_or_else(|| PartyError::Internal(format!("no peer for session {session_id}")))?;

        peer.handle.deliver(PartyEnvelope {
            ack_required: false,
            event: PartyEvent::FullState(self.state.snapshot()),
        })
    }

    fn handle_send_invitation(
        &mut self,
        session_id: SessionId,
        recipient: InvitationRecipient,
        force_generic: bool,
        cancel_token: &CancellationToken,
    ) -> Result<oneshot::Receiver<InvitationOutcome>, PartyError> {
        let sender = self.state.connected_member(&session_id)?.user_id.clone();

        if !InvitationManager::can_send_invitation(&self.state.settings, &sender) {
            return Err(PartyError::Unauthorized(
                "Only the party leader can invite".to_string(),
            ));
        }
        if recipient.user_id == sender {
            return Err(PartyError::InvalidOperation(
                "Cannot invite yourself".to_string(),
            ));
        }
        if self.state.member_by_user(&recipient.user_id).is_some() {
            return Err(PartyError::Conflict("User already in party".to_string()));
        }

        let backend = self.invitations.select_backend(&recipient, force_generic)?;
        let registration = self.invitations.register(
            &mut self.state,
            &sender,
            &recipient.user_id,
            backend,
            cancel_token,
        );

        info!(
            target: "party.invitations",
            party_id = %self.party_id,
            invitation = %registration.id,
            sender = %sender,
            recipient = %recipient.user_id,
            backend = registration.backend.platform_name(),
            "Invitation registered"
        );

        let context = InvitationContext {
            party_id: self.party_id,
            sender: sender.clone(),
            recipient: recipient.clone(),
            cancel_token: registration.cancel_token.clone(),
        };
        let backend = registration.backend;
        let token = registration.cancel_token;
        let invitation_id = registration.id;
        let party = self.self_sender.clone();
        let mailbox = Arc::clone(&self.mailbox);

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => InvitationOutcome::Cancelled,
                result = backend.send_invitation(context) => match result {
                    Ok(true) => InvitationOutcome::Accepted,
                    Ok(false) if token.is_cancelled() => InvitationOutcome::Cancelled,
                    Ok(false) => InvitationOutcome::Refused,
                    Err(e) => InvitationOutcome::Failed(e.to_string()),
                },
            };

            // Completion re-enters the party queue
            if let Some(party) = party.upgrade() {
                let completed = PartyMessage::InvitationCompleted {
                    invitation_id,
                    sender,
                    recipient: recipient.user_id,
                    outcome,
                };
                if party.send(completed).await.is_ok() {
                    mailbox.record_enqueue();
                }
            }
        });

        Ok(registration.outcome)
    }

    fn handle_update_public_server_data(&mut self, entries: BTreeMap<String, String>) -> u64 {
        for (key, value) in entries {
            if value.is_empty() {
                self.state.settings.public_server_data.remove(&key);
            } else {
                self.state.settings.public_server_data.insert(key, value);
            }
        }
        let version = self.state.commit();

        self.broadcast(PartyEvent::SettingsUpdated {
            version_number: version,
            settings_version_number: self.state.settings_version_number,
            settings: self.state.settings.clone(),
            ready_reset: Vec::new(),
        });
        version
    }

    // ------------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------------

    /// Reset ready states if `trigger` is enabled. Returns the users reset.
    fn reset_ready_if(&mut self, trigger: ResetTrigger) -> Vec<UserId> {
        if !self.options.ready_reset.resets_on(trigger) {
            return Vec::new();
        }
        let reset = self.state.reset_ready_states();
        if !reset.is_empty() {
            debug!(
                target: "party.actor.party",
                party_id = %self.party_id,
                trigger = trigger.as_str(),
                reset = reset.len(),
                "Ready states reset"
            );
        }
        reset
    }

    /// Push `event` to every connected member. Versioned events arm the ack
    /// wait when acknowledgments are required.
    fn broadcast(&mut self, event: PartyEvent) {
        let version = event.version();
        let ack_required = self.options.ack.require_ack && version.is_some();
        if ack_required {
            drain_stale_acks(&mut self.ack_receiver);
        }

        let mut delivered = HashSet::new();
        for session_id in self.state.connected_sessions() {
            let Some(peer) = self.peers.get(&session_id) else {
                continue;
            };
            let envelope = PartyEnvelope {
                ack_required,
                event: event.clone(),
            };
            if peer.handle.deliver(envelope).is_ok() {
                delivered.insert(session_id);
            }
        }

        if let (true, Some(version)) = (ack_required, version) {
            self.pending_ack = Some(PendingAck {
                version,
                expected: delivered,
            });
        }
    }

    /// Freeze until the last broadcast is acknowledged or the timeout elapses.
    async fn await_acks(&mut self) {
        let Some(pending) = self.pending_ack.take() else {
            return;
        };

        let outcome = wait_for_acks(
            &mut self.ack_receiver,
            pending.expected,
            pending.version,
            self.options.ack.timeout,
            &self.cancel_token,
        )
        .await;

        if let AckOutcome::TimedOut { missing } = outcome {
            prom::record_ack_timeout();
            debug!(
                target: "party.sync",
                party_id = %self.party_id,
                version = pending.version,
                missing = ?missing,
                "Resuming without acknowledgment"
            );
        }
    }

    fn notify(&self, notification: PartyNotification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }

    fn refresh_ready_notifications(&mut self) {
        let all_ready = self.state.all_ready();
        if all_ready == self.all_ready {
            return;
        }
        self.all_ready = all_ready;

        if all_ready {
            self.notify(PartyNotification::AllMembersReady(self.state.snapshot()));
        } else {
            self.notify(PartyNotification::ReadyCancelled {
                version_number: self.state.version_number,
            });
        }
    }

    // ------------------------------------------------------------------------
    // Supervision
    // ------------------------------------------------------------------------

    /// Treat peers whose task ended as lost connections.
    async fn check_peer_health(&mut self) {
        let finished: Vec<SessionId> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.task_handle.is_finished())
            .map(|(session_id, _)| *session_id)
            .collect();

        for session_id in finished {
            let Some(peer) = self.peers.remove(&session_id) else {
                continue;
            };
            if let Err(e) = peer.task_handle.await {
                if e.is_panic() {
                    self.metrics.record_panic(ActorType::Peer);
                }
            }

            if self.state.member(&session_id).is_some() {
                warn!(
                    target: "party.actor.party",
                    party_id = %self.party_id,
                    session_id = %session_id,
                    "Peer connection lost"
                );
                self.remove_member(session_id, DisconnectionReason::Left).await;
            }
        }
    }

    fn member_cap(&self) -> usize {
        self.state.member_cap(self.options.default_max_members)
    }

    fn status(&self) -> PartyStatus {
        PartyStatus {
            party_id: self.party_id,
            leader_id: self.state.settings.party_leader_id.clone(),
            version_number: self.state.version_number,
            settings_version_number: self.state.settings_version_number,
            member_count: self.state.members.len(),
            connected_count: self.state.connected_count(),
            pending_peers: self.state.pending_accepted_peers.len(),
            pending_invitations: self.state.pending_invitation_count(),
            mailbox_depth: self.mailbox.current_depth(),
            is_disbanding: self.is_disbanding,
        }
    }

    /// Tell every connected member the party is gone and cancel invitations.
    async fn disband(&mut self, reason: &str) {
        if self.is_disbanding {
            return;
        }
        self.is_disbanding = true;

        info!(
            target: "party.actor.party",
            party_id = %self.party_id,
            reason = reason,
            members = self.state.members.len(),
            "Disbanding party"
        );

        for (_, peer) in self.peers.drain() {
            let _ = peer.handle.deliver(PartyEnvelope {
                ack_required: false,
                event: PartyEvent::Disbanded {
                    reason: reason.to_string(),
                },
            });
        }
        self.state.pending_accepted_peers.clear();
        InvitationManager::cancel_all(&mut self.state);
    }

    fn stop(&mut self) {
        InvitationManager::cancel_all(&mut self.state);
        for _ in self.state.members.drain() {
            self.metrics.member_left();
        }
        // Dropped handles let peers drain their mailbox and exit
        self.peers.clear();
        self.metrics.party_removed();
        self.notify(PartyNotification::Disbanded {
            party_id: self.party_id,
        });

        info!(
            target: "party.actor.party",
            party_id = %self.party_id,
            version = self.state.version_number,
            messages_processed = self.mailbox.messages_processed(),
            "PartyActor stopped"
        );
    }
}

/// Send `result` to the caller and return the metric status label.
fn respond<T>(
    respond_to: oneshot::Sender<Result<T, PartyError>>,
    result: Result<T, PartyError>,
) -> &'static str {
    let status = match &result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    let _ = respond_to.send(result);
    status
}
