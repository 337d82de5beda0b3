//! Party and member fixtures.

use party_service::actors::{ActorMetrics, PartyActor, PartyActorHandle};
use party_service::config::{AckPolicy, PartyOptions, ReadyResetPolicy};
use party_service::invitations::{
    GenericInvitationBackend, InvitationBackend, InvitationManager, InvitationRecipient,
    InvitationRequest,
};
use party_service::state::{PartySettingsUpdate, MAX_MEMBERS_SETTING};

use common::{PartyId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default user that leads fixture parties.
pub const TEST_LEADER: &str = "leader";

/// A user to invite.
#[derive(Debug, Clone)]
pub struct TestMember {
    pub user_id: UserId,
    pub platform: String,
    pub is_online: bool,
}

impl TestMember {
    #[must_use]
    pub fn new(user: &str) -> Self {
        Self {
            user_id: UserId::from(user),
            platform: "generic".to_string(),
            is_online: true,
        }
    }

    #[must_use]
    pub fn on_platform(mut self, platform: &str) -> Self {
        self.platform = platform.to_string();
        self
    }

    #[must_use]
    pub fn offline(mut self) -> Self {
        self.is_online = false;
        self
    }

    #[must_use]
    pub fn recipient(&self) -> InvitationRecipient {
        InvitationRecipient {
            user_id: self.user_id.clone(),
            platform: self.platform.clone(),
            is_online: self.is_online,
        }
    }
}

/// A spawned party actor plus everything a test needs around it.
pub struct TestParty {
    pub handle: PartyActorHandle,
    pub task: JoinHandle<()>,
    pub metrics: Arc<ActorMetrics>,
    pub cancel_token: CancellationToken,
    /// Requests the generic backend emits; answer them to resolve invitations.
    pub generic_requests: mpsc::Receiver<InvitationRequest>,
    settings: PartySettingsUpdate,
}

impl TestParty {
    #[must_use]
    pub fn builder() -> TestPartyBuilder {
        TestPartyBuilder::default()
    }

    /// The settings the party was created with.
    #[must_use]
    pub fn settings(&self) -> PartySettingsUpdate {
        self.settings.clone()
    }
}

/// Builder for `TestParty`.
pub struct TestPartyBuilder {
    leader: String,
    settings: PartySettingsUpdate,
    options: PartyOptions,
    backends: Vec<Arc<dyn InvitationBackend>>,
}

impl Default for TestPartyBuilder {
    fn default() -> Self {
        Self {
            leader: TEST_LEADER.to_string(),
            settings: PartySettingsUpdate::default(),
            options: PartyOptions::default(),
            backends: Vec::new(),
        }
    }
}

impl TestPartyBuilder {
    #[must_use]
    pub fn leader(mut self, leader: &str) -> Self {
        self.leader = leader.to_string();
        self
    }

    #[must_use]
    pub fn public(mut self) -> Self {
        self.settings.is_public = true;
        self
    }

    /// Let every member invite, not only the leader.
    #[must_use]
    pub fn anyone_can_invite(mut self) -> Self {
        self.settings.only_leader_can_invite = false;
        self
    }

    #[must_use]
    pub fn game_finder(mut self, name: &str) -> Self {
        self.settings.game_finder_name = name.to_string();
        self
    }

    #[must_use]
    pub fn max_members(mut self, cap: usize) -> Self {
        self.settings
            .server_settings
            .insert(MAX_MEMBERS_SETTING.to_string(), cap.to_string());
        self
    }

    #[must_use]
    pub fn options(mut self, options: PartyOptions) -> Self {
        self.options = options;
        self
    }

    /// Require acknowledgments, waiting at most `timeout`.
    #[must_use]
    pub fn require_ack(mut self, timeout: Duration) -> Self {
        self.options.ack = AckPolicy {
            require_ack: true,
            timeout,
        };
        self
    }

    #[must_use]
    pub fn ready_reset(mut self, policy: ReadyResetPolicy) -> Self {
        self.options.ready_reset = policy;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn InvitationBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Spawn the party actor. Must run inside a Tokio runtime.
    #[must_use]
    pub fn spawn(self) -> TestParty {
        let (generic, generic_requests) = GenericInvitationBackend::channel(16);
        let invitations = InvitationManager::new(Arc::new(generic), self.backends);
        let metrics = ActorMetrics::new();
        let cancel_token = CancellationToken::new();

        let (handle, task) = PartyActor::spawn(
            PartyId::new(),
            UserId::from(self.leader.as_str()),
            self.settings.clone(),
            self.options,
            invitations,
            cancel_token.clone(),
            Arc::clone(&metrics),
        );

        TestParty {
            handle,
            task,
            metrics,
            cancel_token,
            generic_requests,
            settings: self.settings,
        }
    }
}
