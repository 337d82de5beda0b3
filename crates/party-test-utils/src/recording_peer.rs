//! A connected party member that records every event pushed to it.

use party_service::actors::{PartyActorHandle, PartyEnvelope, PartyEvent};
use party_service::errors::PartyError;
use party_service::state::PartySnapshot;

use common::{SessionId, UserId};
use std::time::Duration;
use tokio::sync::mpsc;

/// Outbound buffer of a recording peer.
const RECORDING_BUFFER: usize = 256;

/// How long `next_event` waits before failing the test.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Member connected through the connecting gate, holding the receiving end
/// of its outbound channel.
#[derive(Debug)]
pub struct RecordingPeer {
    session_id: SessionId,
    user_id: UserId,
    joined: PartySnapshot,
    events: mpsc::Receiver<PartyEnvelope>,
}

impl RecordingPeer {
    /// Run the connecting gate and the handshake for `user`.
    pub async fn connect(handle: &PartyActorHandle, user: &str) -> Result<Self, PartyError> {
        Self::connect_session(handle, user, SessionId::new()).await
    }

    pub async fn connect_session(
        handle: &PartyActorHandle,
        user: &str,
        session_id: SessionId,
    ) -> Result<Self, PartyError> {
        let user_id = UserId::from(user);
        handle.peer_connecting(session_id, user_id.clone()).await?;

        let (tx, events) = mpsc::channel(RECORDING_BUFFER);
        let joined = handle.peer_connected(session_id, tx).await?;

        Ok(Self {
            session_id,
            user_id,
            joined,
            events,
        })
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// State returned by the handshake.
    #[must_use]
    pub fn joined(&self) -> &PartySnapshot {
        &self.joined
    }

    /// Next pushed event. Panics after a timeout.
    pub async fn next_event(&mut self) -> PartyEnvelope {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for party event")
            .expect("party closed the outbound channel")
    }

    /// Skip events until one matches `predicate`.
    pub async fn next_matching(&mut self, predicate: impl Fn(&PartyEvent) -> bool) -> PartyEvent {
        loop {
            let envelope = self.next_event().await;
            if predicate(&envelope.event) {
                return envelope.event;
            }
        }
    }

    /// Skip events until one is tagged with a version above `after`,
    /// returning that version.
    pub async fn next_version_after(&mut self, after: u64) -> u64 {
        loop {
            match self.next_event().await.event.version() {
                Some(version) if version > after => return version,
                _ => {}
            }
        }
    }

    /// Everything already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<PartyEnvelope> {
        let mut events = Vec::new();
        while let Ok(envelope) = self.events.try_recv() {
            events.push(envelope);
        }
        events
    }

    /// Acknowledge `version` on behalf of this peer.
    pub fn ack(&self, handle: &PartyActorHandle, version: u64) {
        handle
            .acknowledge(self.session_id, version)
            .expect("party gone while acknowledging");
    }

    /// Wait until the party closes the outbound channel.
    pub async fn closed(&mut self) {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            while self.events.recv().await.is_some() {}
        })
        .await
        .expect("outbound channel still open");
    }
}
