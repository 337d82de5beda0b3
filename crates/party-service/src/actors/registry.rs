//! `PartyRegistryActor` - singleton supervisor for party actors.
//!
//! The `PartyRegistryActor` is the top-level actor of the service:
//!
//! - Singleton per service instance
//! - Supervises one `PartyActor` per party id
//! - Handles party creation, lookup and removal
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Reaps party actors whose task finished (emptied, disbanded or panicked)
//!
//! # Graceful Shutdown
//!
//! On shutdown the registry:
//! 1. Stops accepting new parties
//! 2. Cancels the root `CancellationToken` (every party disbands)
//! 3. Waits for party actors to finish, up to the deadline

use crate::config::{Config, PartyOptions};
use crate::errors::PartyError;
use crate::invitations::InvitationManager;
use crate::state::PartySettingsUpdate;

use super::messages::{RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::party::{PartyActor, PartyActorHandle};

use common::{PartyId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long a removed party gets to disband before it is abandoned.
const REMOVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `PartyRegistryActor`.
#[derive(Clone)]
pub struct PartyRegistryActorHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl PartyRegistryActorHandle {
    /// Spawn the registry and return a handle to it.
    ///
    /// `invitations` is the template cloned into every new party.
    #[must_use]
    pub fn new(config: &Config, invitations: InvitationManager, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = MailboxMonitor::new(ActorType::Registry, config.service_id.clone());

        let actor = PartyRegistryActor {
            service_id: config.service_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            parties: HashMap::new(),
            max_parties: config.max_parties,
            options: config.party,
            invitations,
            accepting_new: true,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, PartyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| PartyError::Internal(format!("channel send failed: {e}")))?;
        self.mailbox.record_enqueue();

        rx.await
            .map_err(|e| PartyError::Internal(format!("response receive failed: {e}")))
    }

    /// Create a party led by `leader`, who gets a reservation.
    pub async fn create_party(
        &self,
        leader: UserId,
        settings: PartySettingsUpdate,
    ) -> Result<PartyActorHandle, PartyError> {
        self.request(|respond_to| RegistryMessage::CreateParty {
            leader,
            settings,
            respond_to,
        })
        .await?
    }

    /// Get a handle to an existing party.
    pub async fn get_party(&self, party_id: PartyId) -> Result<PartyActorHandle, PartyError> {
        self.request(|respond_to| RegistryMessage::GetParty {
            party_id,
            respond_to,
        })
        .await?
    }

    /// Disband and forget a party.
    pub async fn remove_party(&self, party_id: PartyId) -> Result<(), PartyError> {
        self.request(|respond_to| RegistryMessage::RemoveParty {
            party_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, PartyError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting parties, disband the live ones and wait for them to
    /// finish, up to `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), PartyError> {
        self.request(|respond_to| RegistryMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for tasks that must stop with the registry.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedParty {
    handle: PartyActorHandle,
    task_handle: JoinHandle<()>,
}

pub struct PartyRegistryActor {
    service_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Root token.
    cancel_token: CancellationToken,
    parties: HashMap<PartyId, ManagedParty>,
    max_parties: usize,
    options: PartyOptions,
    invitations: InvitationManager,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl PartyRegistryActor {
    #[instrument(skip_all, name = "party.actor.registry", fields(service_id = %self.service_id))]
    async fn run(mut self) {
        info!(
            target: "party.actor.registry",
            service_id = %self.service_id,
            max_parties = self.max_parties,
            "PartyRegistryActor started"
        );

        loop {
            self.check_party_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "party.actor.registry",
                        service_id = %self.service_id,
                        "PartyRegistryActor received cancellation signal"
                    );
                    self.drain_parties(Duration::from_secs(30)).await;
                    break;
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
                                target: "party.actor.registry",
                                service_id = %self.service_id,
                                "PartyRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "party.actor.registry",
            service_id = %self.service_id,
            parties_remaining = self.parties.len(),
            messages_processed = self.mailbox.messages_processed(),
            "PartyRegistryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateParty {
                leader,
                settings,
                respond_to,
            } => {
                // Parties that emptied since the last reap must not hold capacity
                self.check_party_health().await;
                let result = self.create_party(leader, settings);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetParty {
                party_id,
                respond_to,
            } => {
                let result = self
                    .parties
                    .get(&party_id)
                    .filter(|managed| !managed.task_handle.is_finished())
                    .map(|managed| managed.handle.clone())
                    .ok_or_else(|| PartyError::PartyNotFound(party_id.to_string()));
                let _ = respond_to.send(result);
            }

            RegistryMessage::RemoveParty {
                party_id,
                respond_to,
            } => {
                let result = self.remove_party(party_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                info!(
                    target: "party.actor.registry",
                    service_id = %self.service_id,
                    party_count = self.parties.len(),
                    "Initiating graceful shutdown"
                );
                self.drain_parties(deadline).await;
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn create_party(
        &mut self,
        leader: UserId,
        settings: PartySettingsUpdate,
    ) -> Result<PartyActorHandle, PartyError> {
        if !self.accepting_new {
            return Err(PartyError::Draining);
        }
        if self.live_party_count() >= self.max_parties {
            warn!(
                target: "party.actor.registry",
                service_id = %self.service_id,
                max_parties = self.max_parties,
                "Refusing new party, registry at capacity"
            );
            return Err(PartyError::CapacityExceeded);
        }
        if let Err(raw) = settings.max_members() {
            return Err(PartyError::InvalidOperation(format!(
                "Invalid member cap: {raw}"
            )));
        }

        let party_id = PartyId::new();
        let (handle, task_handle) = PartyActor::spawn(
            party_id,
            leader.clone(),
            settings,
            self.options,
            self.invitations.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.parties.insert(
            party_id,
            ManagedParty {
                handle: handle.clone(),
                task_handle,
            },
        );

        info!(
            target: "party.actor.registry",
            service_id = %self.service_id,
            party_id = %party_id,
            leader = %leader,
            total_parties = self.parties.len(),
            "Party actor created"
        );

        Ok(handle)
    }

    /// Disband a party without blocking the message loop on its shutdown.
    fn remove_party(&mut self, party_id: PartyId) -> Result<(), PartyError> {
        let managed = self
            .parties
            .remove(&party_id)
            .ok_or_else(|| PartyError::PartyNotFound(party_id.to_string()))?;

        debug!(
            target: "party.actor.registry",
            service_id = %self.service_id,
            party_id = %party_id,
            "Removing party actor"
        );

        let service_id = self.service_id.clone();
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            if managed
                .handle
                .disband("removed by server".to_string())
                .await
                .is_err()
            {
                managed.handle.cancel();
            }

            match tokio::time::timeout(REMOVAL_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "party.actor.registry",
                        service_id = %service_id,
                        party_id = %party_id,
                        "Party actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    if e.is_panic() {
                        metrics.record_panic(ActorType::Party);
                    }
                    warn!(
                        target: "party.actor.registry",
                        service_id = %service_id,
                        party_id = %party_id,
                        error = ?e,
                        "Party actor task failed during removal"
                    );
                }
                Err(_) => {
                    managed.handle.cancel();
                    warn!(
                        target: "party.actor.registry",
                        service_id = %service_id,
                        party_id = %party_id,
                        "Party actor removal timed out"
                    );
                }
            }
        });

        info!(
            target: "party.actor.registry",
            service_id = %self.service_id,
            party_id = %party_id,
            total_parties = self.parties.len(),
            "Party actor removed"
        );

        Ok(())
    }

    /// Parties whose actor is still running.
    fn live_party_count(&self) -> usize {
        self.parties
            .values()
            .filter(|managed| !managed.task_handle.is_finished())
            .count()
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            party_count: self.live_party_count(),
            member_count: self.metrics.member_count(),
            peer_count: self.metrics.peer_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Disband every party and wait for the actors, up to `deadline` overall.
    async fn drain_parties(&mut self, deadline: Duration) {
        self.accepting_new = false;
        self.cancel_token.cancel();

        let deadline = Instant::now() + deadline;
        for (party_id, managed) in self.parties.drain() {
            match tokio::time::timeout_at(deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "party.actor.registry",
                        service_id = %self.service_id,
                        party_id = %party_id,
                        "Party actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    if e.is_panic() {
                        self.metrics.record_panic(ActorType::Party);
                    }
                    warn!(
                        target: "party.actor.registry",
                        service_id = %self.service_id,
                        party_id = %party_id,
                        error = ?e,
                        "Party actor task failed during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "party.actor.registry",
                        service_id = %self.service_id,
                        party_id = %party_id,
                        "Party actor shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "party.actor.registry",
            service_id = %self.service_id,
            "Graceful shutdown complete"
        );
    }

    /// Forget party actors whose task finished.
    async fn check_party_health(&mut self) {
        let finished: Vec<PartyId> = self
            .parties
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(party_id, _)| *party_id)
            .collect();

        for party_id in finished {
            let Some(managed) = self.parties.remove(&party_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "party.actor.registry",
                        service_id = %self.service_id,
                        party_id = %party_id,
                        "Party actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "party.actor.registry",
                            service_id = %self.service_id,
                            party_id = %party_id,
                            error = ?join_error,
                            "Party actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Party);
                        // A panicked actor never ran its cleanup
                        self.metrics.party_removed();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::invitations::GenericInvitationBackend;
    use common::SessionId;

    fn registry(max_parties: usize) -> (PartyRegistryActorHandle, Arc<ActorMetrics>) {
        let config = Config {
            health_bind_address: "127.0.0.1:0".to_string(),
            service_id: "party-test".to_string(),
            max_parties,
            party: PartyOptions::default(),
        };
        let (generic, _requests) = GenericInvitationBackend::channel(8);
        let invitations = InvitationManager::new(Arc::new(generic), vec![]);
        let metrics = ActorMetrics::new();
        let handle = PartyRegistryActorHandle::new(&config, invitations, Arc::clone(&metrics));
        (handle, metrics)
    }

    #[tokio::test]
    async fn test_registry_create_and_get_party() {
        let (registry, metrics) = registry(10);

        let party = registry
            .create_party(UserId::from("leader"), PartySettingsUpdate::default())
            .await
            .unwrap();

        let found = registry.get_party(party.party_id()).await.unwrap();
        assert_eq!(found.party_id(), party.party_id());

        let status = registry.get_status().await.unwrap();
        assert_eq!(status.party_count, 1);
        assert_eq!(status.member_count, 1);
        assert!(!status.is_draining);
        assert_eq!(metrics.party_count(), 1);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_get_unknown_party() {
        let (registry, _metrics) = registry(10);

        let result = registry.get_party(PartyId::new()).await;
        assert!(matches!(result, Err(PartyError::PartyNotFound(_))));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_refuses_parties_at_capacity() {
        let (registry, _metrics) = registry(1);

        registry
            .create_party(UserId::from("first"), PartySettingsUpdate::default())
            .await
            .unwrap();
        let result = registry
            .create_party(UserId::from("second"), PartySettingsUpdate::default())
            .await;
        assert!(matches!(result, Err(PartyError::CapacityExceeded)));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_rejects_invalid_member_cap() {
        let (registry, _metrics) = registry(10);

        let mut settings = PartySettingsUpdate::default();
        settings
            .server_settings
            .insert(crate::state::MAX_MEMBERS_SETTING.to_string(), "0".to_string());
        let result = registry.create_party(UserId::from("leader"), settings).await;
        assert!(matches!(result, Err(PartyError::InvalidOperation(_))));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_remove_party_disbands_it() {
        let (registry, metrics) = registry(10);
        let party = registry
            .create_party(UserId::from("leader"), PartySettingsUpdate::default())
            .await
            .unwrap();
        let mut notifications = party.subscribe();

        registry.remove_party(party.party_id()).await.unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            notification,
            crate::actors::PartyNotification::Disbanded { .. }
        ));
        assert_eq!(metrics.party_count(), 0);

        let result = registry.get_party(party.party_id()).await;
        assert!(matches!(result, Err(PartyError::PartyNotFound(_))));
    }

    #[tokio::test]
    async fn test_registry_reaps_emptied_party() {
        let (registry, _metrics) = registry(1);
        let party = registry
            .create_party(UserId::from("leader"), PartySettingsUpdate::default())
            .await
            .unwrap();

        let session_id = SessionId::new();
        party
            .peer_connecting(session_id, UserId::from("leader"))
            .await
            .unwrap();
        let (tx, _rx) = mpsc::channel(8);
        party.peer_connected(session_id, tx).await.unwrap();
        party.leave(session_id).await.unwrap();

        // The emptied party frees its slot once reaped
        let mut created = false;
        for _ in 0..50 {
            if registry
                .create_party(UserId::from("next"), PartySettingsUpdate::default())
                .await
                .is_ok()
            {
                created = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(created);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_registry_shutdown_drains_parties() {
        let (registry, metrics) = registry(10);
        registry
            .create_party(UserId::from("a"), PartySettingsUpdate::default())
            .await
            .unwrap();
        registry
            .create_party(UserId::from("b"), PartySettingsUpdate::default())
            .await
            .unwrap();

        registry.shutdown(Duration::from_secs(5)).await.unwrap();

        assert!(registry.is_cancelled());
        assert_eq!(metrics.party_count(), 0);
        assert_eq!(metrics.member_count(), 0);
    }
}
