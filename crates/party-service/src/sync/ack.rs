//! Acknowledgment collection for versioned broadcasts.
//!
//! Acks travel on their own channel, not through the party mailbox: while
//! the party waits for them the mailbox is deliberately not polled.

use common::SessionId;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A member confirming it received the broadcast tagged `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub session_id: SessionId,
    pub version: u64,
}

/// Result of waiting for acknowledgments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Every expected member acknowledged.
    Complete,
    /// The timeout elapsed first. Not fatal: the party resumes.
    TimedOut { missing: Vec<SessionId> },
    /// The party was cancelled while waiting.
    Cancelled,
}

/// Wait until every session in `expected` acknowledged `version` (or a later
/// version), the timeout elapses, or `cancel_token` fires.
///
/// Acks for older versions and from unexpected sessions are discarded.
pub async fn wait_for_acks(
    acks: &mut mpsc::Receiver<Ack>,
    mut expected: HashSet<SessionId>,
    version: u64,
    timeout: Duration,
    cancel_token: &CancellationToken,
) -> AckOutcome {
    if expected.is_empty() {
        return AckOutcome::Complete;
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                return AckOutcome::Cancelled;
            }

            () = &mut deadline => {
                let mut missing: Vec<SessionId> = expected.into_iter().collect();
                missing.sort();
                warn!(
                    target: "party.sync",
                    version = version,
                    missing = missing.len(),
                    "Client acknowledgment timed out, resuming"
                );
                return AckOutcome::TimedOut { missing };
            }

            ack = acks.recv() => {
                let Some(ack) = ack else {
                    // No ack sender left: nobody can answer any more.
                    let mut missing: Vec<SessionId> = expected.into_iter().collect();
                    missing.sort();
                    return AckOutcome::TimedOut { missing };
                };

                if ack.version >= version && expected.remove(&ack.session_id) {
                    debug!(
                        target: "party.sync",
                        version = version,
                        session_id = %ack.session_id,
                        remaining = expected.len(),
                        "Acknowledgment received"
                    );
                    if expected.is_empty() {
                        return AckOutcome::Complete;
                    }
                }
            }
        }
    }
}

/// Discard acks that arrived while nobody was waiting.
pub fn drain_stale_acks(acks: &mut mpsc::Receiver<Ack>) -> usize {
    let mut drained = 0;
    while acks.try_recv().is_ok() {
        drained += 1;
    }
    drained
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_expectation_completes_immediately() {
        let (_tx, mut rx) = mpsc::channel(4);
        let outcome = wait_for_acks(
            &mut rx,
            HashSet::new(),
            1,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome, AckOutcome::Complete);
    }

    #[tokio::test]
    async fn test_all_acks_complete() {
        let (tx, mut rx) = mpsc::channel(4);
        let a = SessionId::new();
        let b = SessionId::new();

        tx.send(Ack { session_id: a, version: 3 }).await.unwrap();
        tx.send(Ack { session_id: b, version: 4 }).await.unwrap();

        let outcome = wait_for_acks(
            &mut rx,
            HashSet::from([a, b]),
            3,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome, AckOutcome::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ack_does_not_count() {
        let (tx, mut rx) = mpsc::channel(4);
        let a = SessionId::new();

        tx.send(Ack { session_id: a, version: 2 }).await.unwrap();

        let outcome = wait_for_acks(
            &mut rx,
            HashSet::from([a]),
            3,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome, AckOutcome::TimedOut { missing: vec![a] });
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_missing_members() {
        let (tx, mut rx) = mpsc::channel(4);
        let a = SessionId::new();
        let b = SessionId::new();
        tx.send(Ack { session_id: a, version: 1 }).await.unwrap();

        let start = tokio::time::Instant::now();
        let outcome = wait_for_acks(
            &mut rx,
            HashSet::from([a, b]),
            1,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, AckOutcome::TimedOut { missing: vec![b] });
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation_ends_wait() {
        let (_tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        token.cancel();

        let outcome = wait_for_acks(
            &mut rx,
            HashSet::from([SessionId::new()]),
            1,
            Duration::from_secs(60),
            &token,
        )
        .await;
        assert_eq!(outcome, AckOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_drain_stale_acks() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(Ack { session_id: SessionId::new(), version: 1 }).await.unwrap();
        tx.send(Ack { session_id: SessionId::new(), version: 1 }).await.unwrap();

        assert_eq!(drain_stale_acks(&mut rx), 2);
        assert_eq!(drain_stale_acks(&mut rx), 0);
    }
}
