//! Integration tests for party state synchronization.
//!
//! Tests the mutation queue end to end through connected members:
//! - Settings updates and ready resets reach every member
//! - Rejected operations change nothing and broadcast nothing
//! - Concurrent mutations are serialized with consecutive versions
//! - Acknowledgment freezes and their timeout
//! - Client views stay in lockstep with the authoritative state

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;
use std::time::Duration;

use party_service::actors::{DisconnectionReason, PartyEnvelope, PartyEvent, PartyNotification};
use party_service::config::ReadyResetPolicy;
use party_service::errors::PartyError;
use party_service::state::{LocalPlayer, PartyMemberStatus};
use party_service::sync::{ApplyResult, ClientPartyView};
use party_test_utils::{RecordingPeer, TestParty, TEST_LEADER};

use common::{SessionId, UserId};
use tokio::sync::mpsc;
use tokio::time::Instant;

fn is_settings_update(event: &PartyEvent) -> bool {
    matches!(event, PartyEvent::SettingsUpdated { .. })
}

async fn ready_all(party: &TestParty, peers: &[&RecordingPeer]) {
    for peer in peers {
        party
            .handle
            .update_player_status(peer.session_id(), PartyMemberStatus::Ready, None)
            .await
            .unwrap();
    }
}

// ============================================================================
// Settings and ready reset
// ============================================================================

#[tokio::test]
async fn test_settings_update_reaches_every_member_and_resets_ready() {
    let party = TestParty::builder().public().game_finder("duo").spawn();
    let mut leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let mut alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();
    let mut bob = RecordingPeer::connect(&party.handle, "bob").await.unwrap();
    ready_all(&party, &[&leader, &alice, &bob]).await;

    let before = party.handle.get_party_state(leader.session_id()).await.unwrap();

    let mut update = party.settings();
    update.custom_data = "mode=ranked".to_string();
    let settings_version = party
        .handle
        .update_settings(leader.session_id(), update)
        .await
        .unwrap();
    assert_eq!(settings_version, before.settings_version_number + 1);

    let mut seen_versions = Vec::new();
    for peer in [&mut leader, &mut alice, &mut bob] {
        let PartyEvent::SettingsUpdated {
            version_number,
            settings,
            ready_reset,
            ..
        } = peer.next_matching(is_settings_update).await
        else {
            panic!("expected a settings update");
        };
        assert_eq!(settings.custom_data, "mode=ranked");
        assert_eq!(ready_reset.len(), 3);
        seen_versions.push(version_number);
    }
    assert!(seen_versions.iter().all(|v| *v == before.version_number + 1));

    let after = party.handle.get_party_state(bob.session_id()).await.unwrap();
    assert!(after
        .members
        .iter()
        .all(|m| m.status_in_party == PartyMemberStatus::NotReady));
}

#[tokio::test]
async fn test_ready_reset_disabled_keeps_ready_states() {
    let party = TestParty::builder()
        .public()
        .game_finder("duo")
        .ready_reset(ReadyResetPolicy::never())
        .spawn();
    let mut leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();
    ready_all(&party, &[&leader, &alice]).await;

    let mut update = party.settings();
    update.custom_data = "map=harbor".to_string();
    party
        .handle
        .update_settings(leader.session_id(), update)
        .await
        .unwrap();

    let PartyEvent::SettingsUpdated { ready_reset, .. } =
        leader.next_matching(is_settings_update).await
    else {
        panic!("expected a settings update");
    };
    assert!(ready_reset.is_empty());

    let state = party.handle.get_party_state(alice.session_id()).await.unwrap();
    assert!(state
        .members
        .iter()
        .all(|m| m.status_in_party == PartyMemberStatus::Ready));
}

#[tokio::test]
async fn test_user_data_update_resets_ready_when_enabled() {
    let policy = ReadyResetPolicy {
        on_settings_updated: false,
        on_member_data_updated: true,
        on_member_list_changed: false,
    };
    let party = TestParty::builder()
        .public()
        .game_finder("duo")
        .ready_reset(policy)
        .spawn();
    let leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let mut alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();
    ready_all(&party, &[&leader, &alice]).await;

    let players = vec![LocalPlayer {
        player_id: "p2".to_string(),
        platform: "generic".to_string(),
        pseudo: "Couch".to_string(),
    }];
    party
        .handle
        .update_user_data(leader.session_id(), b"loadout=7".to_vec(), players)
        .await
        .unwrap();

    // One batch carries the writer's new data and everyone whose ready state was reset
    let PartyEvent::MembersUpdated { members, .. } = alice
        .next_matching(|e| {
            matches!(e, PartyEvent::MembersUpdated { members, .. } if members.len() == 2)
        })
        .await
    else {
        panic!("expected a member batch");
    };
    let writer = members
        .iter()
        .find(|m| m.user_id == UserId::from(TEST_LEADER))
        .unwrap();
    assert_eq!(writer.user_data, b"loadout=7".to_vec());
    assert_eq!(writer.local_players.len(), 1);
    assert!(members
        .iter()
        .all(|m| m.status_in_party == PartyMemberStatus::NotReady));
}

#[tokio::test]
async fn test_ready_notifications_follow_member_states() {
    let party = TestParty::builder().public().game_finder("duo").spawn();
    let mut notifications = party.handle.subscribe();
    let leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();

    ready_all(&party, &[&leader, &alice]).await;
    let snapshot = loop {
        if let PartyNotification::AllMembersReady(snapshot) = notifications.recv().await.unwrap() {
            break snapshot;
        }
    };
    assert_eq!(snapshot.members.len(), 2);

    party
        .handle
        .update_player_status(alice.session_id(), PartyMemberStatus::NotReady, None)
        .await
        .unwrap();
    loop {
        if let PartyNotification::ReadyCancelled { version_number } =
            notifications.recv().await.unwrap()
        {
            assert_eq!(version_number, snapshot.version_number + 1);
            break;
        }
    }
}

// ============================================================================
// Authority
// ============================================================================

#[tokio::test]
async fn test_non_leader_promote_is_rejected_without_side_effects() {
    let party = TestParty::builder().public().spawn();
    let leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let mut alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();
    let before = party.handle.get_party_state(alice.session_id()).await.unwrap();

    let result = party
        .handle
        .promote_leader(alice.session_id(), UserId::from("alice"))
        .await;
    assert!(matches!(result, Err(PartyError::Unauthorized(_))));

    let kick = party
        .handle
        .kick_player(alice.session_id(), UserId::from(TEST_LEADER))
        .await;
    assert!(matches!(kick, Err(PartyError::Unauthorized(_))));

    let settings = party
        .handle
        .update_settings(alice.session_id(), party.settings())
        .await;
    assert!(matches!(settings, Err(PartyError::Unauthorized(_))));

    let after = party.handle.get_party_state(alice.session_id()).await.unwrap();
    assert_eq!(after, before);

    // The next broadcast directly follows the last accepted mutation
    party
        .handle
        .promote_leader(leader.session_id(), UserId::from("alice"))
        .await
        .unwrap();
    let version = alice.next_version_after(before.version_number).await;
    assert_eq!(version, before.version_number + 1);
}

#[tokio::test]
async fn test_unknown_session_is_not_in_party() {
    let party = TestParty::builder().public().spawn();
    let _leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();

    let stranger = common::SessionId::new();
    let result = party
        .handle
        .update_player_status(stranger, PartyMemberStatus::Ready, None)
        .await;
    assert_eq!(result, Err(PartyError::NotInParty));
    assert_eq!(
        party.handle.get_party_state(stranger).await,
        Err(PartyError::NotInParty)
    );
}

#[tokio::test]
async fn test_kicked_member_is_told_and_others_see_departure() {
    let party = TestParty::builder().public().spawn();
    let mut leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let mut alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();

    party
        .handle
        .kick_player(leader.session_id(), UserId::from("alice"))
        .await
        .unwrap();

    let event = alice
        .next_matching(|e| matches!(e, PartyEvent::Disconnected { .. }))
        .await;
    assert_eq!(
        event,
        PartyEvent::Disconnected {
            reason: DisconnectionReason::Kicked
        }
    );
    alice.closed().await;

    let PartyEvent::MemberDisconnected { user_id, reason, .. } = leader
        .next_matching(|e| matches!(e, PartyEvent::MemberDisconnected { .. }))
        .await
    else {
        panic!("expected a departure");
    };
    assert_eq!(user_id, UserId::from("alice"));
    assert_eq!(reason, DisconnectionReason::Kicked);
}

#[tokio::test]
async fn test_kicking_a_member_that_never_reads_does_not_stall_the_party() {
    let party = TestParty::builder().public().spawn();
    let leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();

    // A client whose transport is never drained
    let slow = SessionId::new();
    party
        .handle
        .peer_connecting(slow, UserId::from("slow"))
        .await
        .unwrap();
    let (tx, _undrained) = mpsc::channel::<PartyEnvelope>(1);
    party.handle.peer_connected(slow, tx).await.unwrap();

    for round in 0..200 {
        let status = if round % 2 == 0 {
            PartyMemberStatus::Ready
        } else {
            PartyMemberStatus::NotReady
        };
        party
            .handle
            .update_player_status(leader.session_id(), status, None)
            .await
            .unwrap();
    }

    tokio::time::timeout(
        Duration::from_secs(3),
        party
            .handle
            .kick_player(leader.session_id(), UserId::from("slow")),
    )
    .await
    .expect("kick should not wait on the stalled client")
    .unwrap();

    let status = tokio::time::timeout(Duration::from_secs(2), party.handle.get_status())
        .await
        .expect("party should keep answering")
        .unwrap();
    assert_eq!(status.member_count, 1);
    assert_eq!(status.leader_id, UserId::from(TEST_LEADER));
}

// ============================================================================
// Serializability
// ============================================================================

#[tokio::test]
async fn test_concurrent_status_updates_get_consecutive_versions() {
    let party = TestParty::builder().public().game_finder("duo").spawn();
    let mut leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let mut alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();
    let base = party.handle.get_party_state(leader.session_id()).await.unwrap();

    let (first, second) = tokio::join!(
        party
            .handle
            .update_player_status(leader.session_id(), PartyMemberStatus::Ready, None),
        party
            .handle
            .update_player_status(alice.session_id(), PartyMemberStatus::Ready, None),
    );
    first.unwrap();
    second.unwrap();

    let from_leader = [
        leader.next_version_after(base.version_number).await,
        leader.next_version_after(base.version_number + 1).await,
    ];
    let from_alice = [
        alice.next_version_after(base.version_number).await,
        alice.next_version_after(base.version_number + 1).await,
    ];
    assert_eq!(from_leader, [base.version_number + 1, base.version_number + 2]);
    assert_eq!(from_alice, from_leader);
}

#[tokio::test]
async fn test_stale_settings_fence_rejects_ready() {
    let party = TestParty::builder().public().game_finder("duo").spawn();
    let leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();
    let seen = alice.joined().settings_version_number;

    party
        .handle
        .update_settings(leader.session_id(), party.settings())
        .await
        .unwrap();

    let result = party
        .handle
        .update_player_status(alice.session_id(), PartyMemberStatus::Ready, Some(seen))
        .await;
    assert_eq!(
        result,
        Err(PartyError::StaleSettings {
            expected: seen,
            current: seen + 1
        })
    );

    party
        .handle
        .update_player_status(alice.session_id(), PartyMemberStatus::Ready, Some(seen + 1))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_client_views_track_authoritative_state() {
    let party = TestParty::builder().public().game_finder("duo").spawn();
    let mut leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let mut view = ClientPartyView::from_snapshot(leader.joined().clone());

    let alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();
    let bob = RecordingPeer::connect(&party.handle, "bob").await.unwrap();
    party
        .handle
        .update_player_status(alice.session_id(), PartyMemberStatus::Ready, None)
        .await
        .unwrap();
    party
        .handle
        .promote_leader(leader.session_id(), UserId::from("bob"))
        .await
        .unwrap();
    party.handle.leave(alice.session_id()).await.unwrap();
    party
        .handle
        .update_public_server_data(BTreeMap::from([(
            "region".to_string(),
            "eu-west".to_string(),
        )]))
        .await
        .unwrap();

    let authoritative = party.handle.get_party_state(bob.session_id()).await.unwrap();
    while view.version() != Some(authoritative.version_number) {
        let envelope = leader.next_event().await;
        let result = view.apply(&envelope.event);
        assert!(
            matches!(result, ApplyResult::Applied | ApplyResult::Duplicate),
            "unexpected {result:?}"
        );
    }

    let view = view.snapshot().unwrap();
    assert_eq!(view.settings, authoritative.settings);
    let mut local: Vec<_> = view.members.iter().map(|m| (&m.user_id, m.is_leader)).collect();
    let mut remote: Vec<_> = authoritative
        .members
        .iter()
        .map(|m| (&m.user_id, m.is_leader))
        .collect();
    local.sort();
    remote.sort();
    assert_eq!(local, remote);
}

#[tokio::test]
async fn test_gap_in_versions_requires_resync() {
    let party = TestParty::builder().public().spawn();
    let _leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let mut alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();
    let mut view = ClientPartyView::from_snapshot(alice.joined().clone());
    let joined_at = alice.joined().version_number;

    party
        .handle
        .update_public_server_data(BTreeMap::from([("a".to_string(), "1".to_string())]))
        .await
        .unwrap();
    party
        .handle
        .update_public_server_data(BTreeMap::from([("b".to_string(), "2".to_string())]))
        .await
        .unwrap();

    // Skip one version, as a lossy client would
    alice.next_version_after(joined_at).await;
    let envelope = alice.next_event().await;
    assert_eq!(
        view.apply(&envelope.event),
        ApplyResult::ResyncRequired {
            expected: joined_at + 1,
            received: joined_at + 2
        }
    );

    party.handle.send_party_state(alice.session_id()).await.unwrap();
    let full = alice
        .next_matching(|e| matches!(e, PartyEvent::FullState(_)))
        .await;
    assert_eq!(view.apply(&full), ApplyResult::Applied);
    assert_eq!(view.version(), Some(joined_at + 2));
}

// ============================================================================
// Acknowledgments
// ============================================================================

/// Join broadcasts may still be in flight when the test starts.
async fn next_settings_envelope(peer: &mut RecordingPeer) -> PartyEnvelope {
    loop {
        let envelope = peer.next_event().await;
        if is_settings_update(&envelope.event) {
            return envelope;
        }
    }
}

/// Connect three members and let every join broadcast settle.
async fn acked_party(timeout: Duration) -> (TestParty, [RecordingPeer; 3]) {
    let party = TestParty::builder().public().require_ack(timeout).spawn();
    let leader = RecordingPeer::connect(&party.handle, TEST_LEADER).await.unwrap();
    let alice = RecordingPeer::connect(&party.handle, "alice").await.unwrap();
    let bob = RecordingPeer::connect(&party.handle, "bob").await.unwrap();

    // Queued behind any pending freeze
    party.handle.get_status().await.unwrap();
    let mut peers = [leader, alice, bob];
    for peer in &mut peers {
        peer.drain();
    }
    (party, peers)
}

#[tokio::test(start_paused = true)]
async fn test_missing_ack_holds_queue_until_timeout() {
    let timeout = Duration::from_secs(2);
    let (party, [mut leader, mut alice, mut bob]) = acked_party(timeout).await;

    let started = Instant::now();
    let mut update = party.settings();
    update.custom_data = "v2".to_string();
    party
        .handle
        .update_settings(leader.session_id(), update)
        .await
        .unwrap();

    for peer in [&mut leader, &mut alice] {
        let envelope = next_settings_envelope(peer).await;
        assert!(envelope.ack_required);
        peer.ack(&party.handle, envelope.event.version().unwrap());
    }
    let envelope = next_settings_envelope(&mut bob).await;
    assert!(envelope.ack_required);

    // Bob never acknowledges
    party.handle.get_status().await.unwrap();
    assert!(started.elapsed() >= timeout);
}

#[tokio::test(start_paused = true)]
async fn test_all_acks_release_queue_early() {
    let timeout = Duration::from_secs(2);
    let (party, mut peers) = acked_party(timeout).await;

    let started = Instant::now();
    party
        .handle
        .update_public_server_data(BTreeMap::from([("k".to_string(), "v".to_string())]))
        .await
        .unwrap();

    for peer in &mut peers {
        let envelope = next_settings_envelope(peer).await;
        peer.ack(&party.handle, envelope.event.version().unwrap());
    }

    party.handle.get_status().await.unwrap();
    assert!(started.elapsed() < timeout);
}

#[tokio::test(start_paused = true)]
async fn test_stale_ack_does_not_release_queue() {
    let timeout = Duration::from_secs(2);
    let (party, mut peers) = acked_party(timeout).await;
    let stale = party.handle.get_status().await.unwrap().version_number;

    let started = Instant::now();
    party
        .handle
        .update_public_server_data(BTreeMap::from([("k".to_string(), "v".to_string())]))
        .await
        .unwrap();

    for peer in &mut peers {
        next_settings_envelope(peer).await;
        peer.ack(&party.handle, stale);
    }

    party.handle.get_status().await.unwrap();
    assert!(started.elapsed() >= timeout);
}
