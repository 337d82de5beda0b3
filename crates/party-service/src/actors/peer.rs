//! `PeerActor` - one per connected member session.
//!
//! Sits between the `PartyActor` and the transport: the party hands it
//! envelopes without waiting on the client, and the peer forwards them to the
//! transport's outbound channel in order.
//!
//! # Lifecycle
//!
//! 1. Spawned when a pending peer is promoted to `Connected`
//! 2. Runs until the transport's channel closes, the party closes it
//!    (leave/kick/disband), or the party's token is cancelled
//! 3. A peer whose task finished is treated by the party as a lost connection

use crate::errors::PartyError;

use super::messages::{DisconnectionReason, PartyEnvelope, PartyEvent, PeerMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::{PartyId, SessionId, UserId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Peer mailbox size. A client this far behind misses events and resyncs.
const PEER_CHANNEL_BUFFER: usize = 128;

/// Handle to a `PeerActor`.
#[derive(Clone, Debug)]
pub struct PeerActorHandle {
    sender: mpsc::Sender<PeerMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    session_id: SessionId,
}

impl PeerActorHandle {
    /// Queue an event for the client without waiting.
    ///
    /// A full mailbox drops the event; the client sees the version gap and resyncs.
    pub fn deliver(&self, envelope: PartyEnvelope) -> Result<(), PartyError> {
        match self.sender.try_send(PeerMessage::Deliver { envelope }) {
            Ok(()) => {
                self.mailbox.record_enqueue();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "party.actor.peer",
                    session_id = %self.session_id,
                    "Peer mailbox full, dropping event"
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(PartyError::Internal(format!(
                "peer {} is closed",
                self.session_id
            ))),
        }
    }

    /// Tell the client why it is being disconnected, then stop the actor.
    ///
    /// Never waits on the client. A peer whose mailbox is full is cancelled
    /// without the farewell.
    pub fn close(&self, reason: DisconnectionReason) {
        match self.sender.try_send(PeerMessage::Close { reason }) {
            Ok(()) => self.mailbox.record_enqueue(),
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "party.actor.peer",
                    session_id = %self.session_id,
                    reason = reason.as_str(),
                    "Peer mailbox full, cancelling without notice"
                );
                self.cancel_token.cancel();
            }
            Err(TrySendError::Closed(_)) => self.cancel_token.cancel(),
        }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

pub struct PeerActor {
    session_id: SessionId,
    user_id: UserId,
    party_id: PartyId,
    receiver: mpsc::Receiver<PeerMessage>,
    /// Transport-side channel to the client.
    outbound: mpsc::Sender<PartyEnvelope>,
    /// Child of the party's token.
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl PeerActor {
    /// Spawn a peer actor forwarding to `outbound`.
    pub fn spawn(
        session_id: SessionId,
        user_id: UserId,
        party_id: PartyId,
        outbound: mpsc::Sender<PartyEnvelope>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (PeerActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(PEER_CHANNEL_BUFFER);
        let mailbox = MailboxMonitor::new(ActorType::Peer, session_id.to_string());

        metrics.peer_started();

        let actor = Self {
            session_id,
            user_id,
            party_id,
            receiver,
            outbound,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PeerActorHandle {
            sender,
            cancel_token,
            mailbox,
            session_id,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "party.actor.peer",
        fields(session_id = %self.session_id, party_id = %self.party_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "party.actor.peer",
            session_id = %self.session_id,
            user_id = %self.user_id,
            "PeerActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "party.actor.peer",
                        session_id = %self.session_id,
                        "PeerActor received cancellation signal"
                    );
                    break;
                }

                // Transport dropped the client
                () = self.outbound.closed() => {
                    debug!(
                        target: "party.actor.peer",
                        session_id = %self.session_id,
                        "Transport channel closed"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            let should_exit = self.handle_message(message).await;
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "party.actor.peer",
                                session_id = %self.session_id,
                                "PeerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.peer_stopped();
        info!(
            target: "party.actor.peer",
            session_id = %self.session_id,
            user_id = %self.user_id,
            messages_processed = self.mailbox.messages_processed(),
            "PeerActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: PeerMessage) -> bool {
        match message {
            PeerMessage::Deliver { envelope } => {
                debug!(
                    target: "party.actor.peer",
                    session_id = %self.session_id,
                    version = ?envelope.event.version(),
                    "Delivering event"
                );
                !self.forward(envelope).await
            }

            PeerMessage::Close { reason } => {
                let envelope = PartyEnvelope {
                    ack_required: false,
                    event: PartyEvent::Disconnected { reason },
                };
                self.forward(envelope).await;
                debug!(
                    target: "party.actor.peer",
                    session_id = %self.session_id,
                    reason = reason.as_str(),
                    "Peer closed by party"
                );
                true
            }
        }
    }

    /// Send to the transport, giving up if the peer is cancelled first.
    /// Returns false if the envelope was not sent.
    async fn forward(&self, envelope: PartyEnvelope) -> bool {
        tokio::select! {
            () = self.cancel_token.cancelled() => false,
            sent = self.outbound.send(envelope) => sent.is_ok(),
        }
    }
}
