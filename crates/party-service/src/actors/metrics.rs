//! Actor metrics and mailbox monitoring.
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Registry   | < 200  | 200-1000| > 1000   |
//! | Party      | < 64   | 64-256  | > 256    |
//! | Peer       | < 32   | 32-128  | > 128    |
//!
//! A `MailboxMonitor` is shared between an actor and its handles: handles
//! record the enqueue after a successful send, the actor records the dequeue
//! when it picks the message up.

use crate::observability::metrics as prom;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const REGISTRY_MAILBOX_NORMAL: usize = 200;
pub const REGISTRY_MAILBOX_WARNING: usize = 1000;

pub const PARTY_MAILBOX_NORMAL: usize = 64;
pub const PARTY_MAILBOX_WARNING: usize = 256;

pub const PEER_MAILBOX_NORMAL: usize = 32;
pub const PEER_MAILBOX_WARNING: usize = 128;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `PartyRegistryActor` (singleton).
    Registry,
    /// `PartyActor` (one per party).
    Party,
    /// `PeerActor` (one per connected member session).
    Peer,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Party => "party",
            ActorType::Peer => "peer",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_WARNING,
            ActorType::Party => PARTY_MAILBOX_WARNING,
            ActorType::Peer => PEER_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_NORMAL,
            ActorType::Party => PARTY_MAILBOX_NORMAL,
            ActorType::Peer => PEER_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth of one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Party id, session id, or "registry".
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        })
    }

    /// Record a message accepted by the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        prom::set_mailbox_depth(self.actor_type.as_str(), new_depth);

        match self.level_for_depth(new_depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "party.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = new_depth,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                );
            }
            // Log once when crossing into the warning band
            MailboxLevel::Warning if new_depth == self.actor_type.normal_threshold() + 1 => {
                debug!(
                    target: "party.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = new_depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Record a message taken off the mailbox.
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .unwrap_or_default();
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        prom::set_mailbox_depth(self.actor_type.as_str(), previous.saturating_sub(1));
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Service-wide actor counters, shared by every actor.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_parties: AtomicUsize,
    active_members: AtomicUsize,
    active_peers: AtomicUsize,
    actor_panics: AtomicU64,
    total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn party_created(&self) {
        let count = self.active_parties.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_parties_active(count);
    }

    pub fn party_removed(&self) {
        let count = decrement(&self.active_parties);
        prom::set_parties_active(count);
    }

    pub fn member_joined(&self) {
        let count = self.active_members.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_members_active(count);
    }

    pub fn member_left(&self) {
        let count = decrement(&self.active_members);
        prom::set_members_active(count);
    }

    pub fn peer_started(&self) {
        self.active_peers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peer_stopped(&self) {
        decrement(&self.active_peers);
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::error!(
            target: "party.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn party_count(&self) -> usize {
        self.active_parties.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.active_members.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.active_peers.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.total_messages_processed.load(Ordering::Relaxed)
    }
}

/// Saturating decrement; returns the new value.
fn decrement(counter: &AtomicUsize) -> usize {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some(c.saturating_sub(1)))
        .unwrap_or_default()
        .saturating_sub(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_thresholds() {
        assert_eq!(ActorType::Party.as_str(), "party");
        assert_eq!(ActorType::Party.normal_threshold(), 64);
        assert_eq!(ActorType::Party.warning_threshold(), 256);
        assert_eq!(ActorType::Peer.normal_threshold(), 32);
        assert_eq!(ActorType::Registry.warning_threshold(), 1000);
    }

    #[test]
    fn test_mailbox_depth_and_peak() {
        let monitor = MailboxMonitor::new(ActorType::Party, "party-1");

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_dequeue_never_underflows() {
        let monitor = MailboxMonitor::new(ActorType::Peer, "session");
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_mailbox_levels() {
        let monitor = MailboxMonitor::new(ActorType::Party, "party-1");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..100 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..200 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_actor_metrics_counts() {
        let metrics = ActorMetrics::new();

        metrics.party_created();
        metrics.party_created();
        metrics.member_joined();
        metrics.peer_started();
        assert_eq!(metrics.party_count(), 2);
        assert_eq!(metrics.member_count(), 1);
        assert_eq!(metrics.peer_count(), 1);

        metrics.party_removed();
        metrics.member_left();
        metrics.member_left();
        metrics.peer_stopped();
        assert_eq!(metrics.party_count(), 1);
        assert_eq!(metrics.member_count(), 0);
        assert_eq!(metrics.peer_count(), 0);
    }

    #[test]
    fn test_actor_metrics_panics() {
        let metrics = ActorMetrics::new();
        metrics.record_panic(ActorType::Party);
        metrics.record_panic(ActorType::Peer);
        assert_eq!(metrics.panic_count(), 2);
    }
}
