//! Scriptable invitation backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use party_test_utils::MockInvitationBackend;
//!
//! let steam = Arc::new(MockInvitationBackend::accepting("steam").with_priority(10));
//! let manager = InvitationManager::new(generic, vec![steam.clone()]);
//! // ... send an invitation ...
//! assert_eq!(steam.call_count(), 1);
//! ```

use party_service::errors::InvitationError;
use party_service::invitations::{InvitationBackend, InvitationContext};

use common::UserId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// How the mock answers `send_invitation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Resolve `true` immediately.
    Accept,
    /// Resolve `false` immediately.
    Refuse,
    /// Fail with `InvitationError::Platform`.
    Fail(String),
    /// Never answer; resolve `false` once the invitation is cancelled.
    PendUntilCancelled,
}

/// Mock invitation backend for one platform.
#[derive(Debug)]
pub struct MockInvitationBackend {
    platform: String,
    priority: i32,
    reaches_offline: bool,
    behavior: MockBehavior,
    calls: AtomicUsize,
    recipients: Mutex<Vec<UserId>>,
    call_started: Arc<Notify>,
}

impl MockInvitationBackend {
    #[must_use]
    pub fn new(platform: &str, behavior: MockBehavior) -> Self {
        Self {
            platform: platform.to_string(),
            priority: 0,
            reaches_offline: false,
            behavior,
            calls: AtomicUsize::new(0),
            recipients: Mutex::new(Vec::new()),
            call_started: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn accepting(platform: &str) -> Self {
        Self::new(platform, MockBehavior::Accept)
    }

    #[must_use]
    pub fn refusing(platform: &str) -> Self {
        Self::new(platform, MockBehavior::Refuse)
    }

    #[must_use]
    pub fn failing(platform: &str, reason: &str) -> Self {
        Self::new(platform, MockBehavior::Fail(reason.to_string()))
    }

    #[must_use]
    pub fn pending(platform: &str) -> Self {
        Self::new(platform, MockBehavior::PendUntilCancelled)
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Allow invitations to recipients without a session.
    #[must_use]
    pub fn reaching_offline(mut self) -> Self {
        self.reaches_offline = true;
        self
    }

    /// Number of `send_invitation` calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Recipients of every call, in call order.
    #[must_use]
    pub fn recipients(&self) -> Vec<UserId> {
        self.recipients.lock().unwrap().clone()
    }

    /// Wait until the next `send_invitation` call starts.
    pub async fn wait_for_call(&self) {
        self.call_started.notified().await;
    }
}

#[async_trait::async_trait]
impl InvitationBackend for MockInvitationBackend {
    fn platform_name(&self) -> &str {
        &self.platform
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_invitation_compatible_with(&self, platform: &str) -> bool {
        platform == self.platform
    }

    fn can_send_invite_to_disconnected_player(&self) -> bool {
        self.reaches_offline
    }

    async fn send_invitation(&self, context: InvitationContext) -> Result<bool, InvitationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recipients
            .lock()
            .unwrap()
            .push(context.recipient.user_id.clone());
        self.call_started.notify_one();

        match &self.behavior {
            MockBehavior::Accept => Ok(true),
            MockBehavior::Refuse => Ok(false),
            MockBehavior::Fail(reason) => Err(InvitationError::Platform(reason.clone())),
            MockBehavior::PendUntilCancelled => {
                context.cancel_token.cancelled().await;
                Ok(false)
            }
        }
    }
}
