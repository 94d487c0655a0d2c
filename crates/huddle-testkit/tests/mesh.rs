//! Multi-device scenarios over the in-memory network.

use std::time::Duration;

use huddle::{DecisionOutcome, KnownPeer, NodeConfig, NodeEvent, PeerState};
use huddle_core::should_initiate;
use huddle_store::StoreExt;
use huddle_testkit::{eventually, message, TestDevice, TestMesh};

fn invitations_sent(events: &[NodeEvent]) -> usize {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                NodeEvent::PeerStateChanged {
                    state: Some(PeerState::InvitationSent),
                    ..
                }
            )
        })
        .count()
}

async fn start_both(a: &TestDevice, b: &TestDevice) {
    a.handle.start().await.unwrap();
    b.handle.start().await.unwrap();
}

#[tokio::test]
async fn test_known_pair_connects_with_exactly_one_invitation() {
    let mesh = TestMesh::new();
    let (mut a, mut b) = mesh.spawn_known_pair("Phone", "Laptop").await;

    start_both(&a, &b).await;
    a.wait_connected_to(&b).await;
    b.wait_connected_to(&a).await;

    let sent_by_a = invitations_sent(&a.drain_events());
    let sent_by_b = invitations_sent(&b.drain_events());
    assert_eq!(sent_by_a + sent_by_b, 1);

    let a_leads = should_initiate(a.user_id(), b.user_id());
    assert_eq!(sent_by_a == 1, a_leads);
}

#[tokio::test]
async fn test_fresh_devices_pair_on_first_sighting() {
    let mesh = TestMesh::new();
    let mut a = mesh.spawn("Phone").await;
    let mut b = mesh.spawn("Laptop").await;

    start_both(&a, &b).await;
    a.wait_connected_to(&b).await;
    b.wait_connected_to(&a).await;

    let sent_by_a = invitations_sent(&a.drain_events());
    let sent_by_b = invitations_sent(&b.drain_events());
    assert_eq!(sent_by_a + sent_by_b, 1);
    assert_eq!(sent_by_a == 1, should_initiate(a.user_id(), b.user_id()));

    for (device, other) in [(&a, &b), (&b, &a)] {
        let known = device.handle.known_peers().await.unwrap();
        assert_eq!(known.len(), 1);
        assert_eq!(&known[0].user_id, other.user_id());
        assert!(known[0].sync_enabled);
    }
}

#[tokio::test]
async fn test_rejected_invitation_marks_peer_rejected() {
    let mesh = TestMesh::new();
    let a_setup = mesh.prepare("Phone").await;
    let b_setup = mesh.prepare("Laptop").await;
    // The laptop knows the phone but has paused sync with it, so it asks.
    b_setup
        .store
        .save_known_peers(&[KnownPeer {
            display_name: "Phone".into(),
            user_id: a_setup.identity.user_id.clone(),
            last_seen_at: 1,
            sync_enabled: false,
        }])
        .await
        .unwrap();
    let a = mesh.launch(a_setup).await;
    let mut b = mesh.launch(b_setup).await;
    start_both(&a, &b).await;

    let b_user = b.user_id().clone();
    eventually("discovery", || {
        let b_user = b_user.clone();
        let a = &a;
        async move { a.record_of(&b_user).await.is_some() }
    })
    .await;
    let record = a.record_of(b.user_id()).await.unwrap();
    if record.state.is_invitable() {
        a.handle.invite(record.handle).await.unwrap();
    }

    let NodeEvent::InvitationReceived { handle, user_id, .. } = b
        .wait_for(|e| matches!(e, NodeEvent::InvitationReceived { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(&user_id, a.user_id());
    b.handle.respond_to_invitation(handle, false).await.unwrap();

    eventually("rejection", || async {
        a.record_of(b.user_id())
            .await
            .is_some_and(|r| r.state == PeerState::Rejected)
    })
    .await;
    assert!(!b.is_connected_to(a.user_id()).await);
}

#[tokio::test]
async fn test_superset_log_merges_automatically() {
    let mesh = TestMesh::new();
    let (a_setup, b_setup) = mesh.prepare_known_pair("Phone", "Laptop").await;
    let author = a_setup.identity.user_id.clone();
    let (m1, m2, m3) = (message(&author, 1, 10), message(&author, 2, 20), message(&author, 3, 30));
    a_setup.store.save_messages(&[m1.clone(), m2.clone()]).await.unwrap();
    b_setup
        .store
        .save_messages(&[m1.clone(), m2.clone(), m3.clone()])
        .await
        .unwrap();

    let a = mesh.launch(a_setup).await;
    let b = mesh.launch(b_setup).await;
    start_both(&a, &b).await;

    eventually("merge", || async { a.user_message_ids().await.len() == 3 }).await;
    assert_eq!(a.user_message_ids().await, vec![m1.id, m2.id, m3.id]);
    assert_eq!(a.system_note_count().await, 1);
    assert!(a.handle.pending_conflicts().await.unwrap().is_empty());

    // b already had everything and only notes that it is in sync.
    eventually("b notes sync", || async { b.system_note_count().await == 1 }).await;
    assert_eq!(b.user_message_ids().await, vec![m1.id, m2.id, m3.id]);
    assert_eq!(a.handle.digest().await.unwrap(), b.handle.digest().await.unwrap());

    let persisted = a.store.load_messages().await.unwrap();
    assert_eq!(persisted.iter().filter(|m| !m.is_system).count(), 3);
}

#[tokio::test]
async fn test_conflict_resolution_is_asymmetric() {
    let mesh = TestMesh::new();
    let (a_setup, b_setup) = mesh.prepare_known_pair("Phone", "Laptop").await;
    let m1 = message(&a_setup.identity.user_id, 1, 10);
    let m2 = message(&b_setup.identity.user_id, 2, 20);
    a_setup.store.save_messages(&[m1.clone()]).await.unwrap();
    b_setup.store.save_messages(&[m2.clone()]).await.unwrap();

    let mut a = mesh.launch(a_setup).await;
    let mut b = mesh.launch(b_setup).await;
    start_both(&a, &b).await;

    let NodeEvent::ConflictDetected { handle, local_only, remote_only, .. } = a
        .wait_for(|e| matches!(e, NodeEvent::ConflictDetected { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!((local_only, remote_only), (1, 1));
    b.wait_for(|e| matches!(e, NodeEvent::ConflictDetected { .. }))
        .await;

    // Nothing changes until someone decides.
    assert_eq!(a.user_message_ids().await, vec![m1.id]);
    assert_eq!(b.user_message_ids().await, vec![m2.id]);

    // a keeps its own history; b must adopt it.
    let outcome = a.handle.resolve_conflict(handle, false).await.unwrap();
    assert_eq!(outcome, DecisionOutcome::KeptLocal);

    let resolved = b
        .wait_for(|e| matches!(e, NodeEvent::ConflictResolved { .. }))
        .await;
    assert!(matches!(
        resolved,
        NodeEvent::ConflictResolved {
            outcome: DecisionOutcome::AdoptedRemote { messages: 1 },
            ..
        }
    ));

    assert_eq!(a.user_message_ids().await, vec![m1.id]);
    assert_eq!(b.user_message_ids().await, vec![m1.id]);
    assert_eq!(a.system_note_count().await, 1);
    assert_eq!(b.system_note_count().await, 1);
    assert!(a.handle.pending_conflicts().await.unwrap().is_empty());
    assert!(b.handle.pending_conflicts().await.unwrap().is_empty());
    assert_eq!(a.handle.digest().await.unwrap(), b.handle.digest().await.unwrap());
}

#[tokio::test]
async fn test_adopting_remote_history() {
    let mesh = TestMesh::new();
    let (a_setup, b_setup) = mesh.prepare_known_pair("Phone", "Laptop").await;
    let m1 = message(&a_setup.identity.user_id, 1, 10);
    let m2 = message(&b_setup.identity.user_id, 2, 20);
    a_setup.store.save_messages(&[m1.clone()]).await.unwrap();
    b_setup.store.save_messages(&[m2.clone()]).await.unwrap();

    let mut a = mesh.launch(a_setup).await;
    let mut b = mesh.launch(b_setup).await;
    start_both(&a, &b).await;

    let NodeEvent::ConflictDetected { handle, .. } = a
        .wait_for(|e| matches!(e, NodeEvent::ConflictDetected { .. }))
        .await
    else {
        unreachable!()
    };
    b.wait_for(|e| matches!(e, NodeEvent::ConflictDetected { .. }))
        .await;

    let outcome = a.handle.resolve_conflict(handle, true).await.unwrap();
    assert_eq!(outcome, DecisionOutcome::AdoptedRemote { messages: 1 });
    b.wait_for(|e| matches!(e, NodeEvent::ConflictResolved { .. }))
        .await;

    assert_eq!(a.user_message_ids().await, vec![m2.id]);
    assert_eq!(b.user_message_ids().await, vec![m2.id]);
    let adopted = a.handle.messages().await.unwrap();
    assert!(adopted.iter().filter(|m| !m.is_system).all(|m| !m.is_from_local_user));
}

#[tokio::test]
async fn test_live_messages_and_memories_flow() {
    let mesh = TestMesh::new();
    let (a, b) = mesh.spawn_known_pair("Phone", "Laptop").await;
    start_both(&a, &b).await;
    a.wait_connected_to(&b).await;
    b.wait_connected_to(&a).await;

    let sent = a.handle.send_message("hello laptop").await.unwrap();
    eventually("chat delivery", || async { b.user_message_ids().await == vec![sent.id] }).await;
    let received = b.handle.messages().await.unwrap();
    let received = received.iter().find(|m| m.id == sent.id).unwrap();
    assert!(!received.is_from_local_user);
    assert_eq!(received.content, "hello laptop");

    let record = b
        .handle
        .add_memory("prefers dark mode", Some("settings".into()))
        .await
        .unwrap();
    eventually("memory delivery", || async { a.handle.memories().await.unwrap() == vec![record.clone()] })
        .await;
}

#[tokio::test]
async fn test_memories_union_on_connect() {
    let mesh = TestMesh::new();
    let (a_setup, b_setup) = mesh.prepare_known_pair("Phone", "Laptop").await;
    let shared = huddle_core::MemoryRecord::new("birthday in May");
    let only_a = huddle_core::MemoryRecord::new("allergic to cats");
    let only_b = huddle_core::MemoryRecord::new("runs on Sundays");
    a_setup
        .store
        .save_memories(&[shared.clone(), only_a.clone()])
        .await
        .unwrap();
    b_setup
        .store
        .save_memories(&[shared.clone(), only_b.clone()])
        .await
        .unwrap();

    let a = mesh.launch(a_setup).await;
    let b = mesh.launch(b_setup).await;
    start_both(&a, &b).await;

    for device in [&a, &b] {
        eventually("memory union", || async { device.handle.memories().await.unwrap().len() == 3 }).await;
    }
}

#[tokio::test]
async fn test_forget_is_bidirectional_and_does_not_block() {
    let mesh = TestMesh::new();
    let (a, b) = mesh.spawn_known_pair("Phone", "Laptop").await;
    start_both(&a, &b).await;
    a.wait_connected_to(&b).await;
    b.wait_connected_to(&a).await;

    a.handle.forget(b.user_id().clone(), false).await.unwrap();

    eventually("mutual forget", || async {
        a.handle.known_peers().await.unwrap().is_empty()
            && b.handle.known_peers().await.unwrap().is_empty()
    })
    .await;
    assert!(a.handle.blocked_users().await.unwrap().is_empty());
    assert!(b.handle.blocked_users().await.unwrap().is_empty());
    assert!(b.store.load_known_peers().await.unwrap().is_empty());
    assert!(b.store.load_sync_enabled().await.unwrap().is_empty());

    // Neither side reconnects on its own.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!a.is_connected_to(b.user_id()).await);
    assert!(!b.is_connected_to(a.user_id()).await);
}

#[tokio::test]
async fn test_forget_and_block() {
    let mesh = TestMesh::new();
    let (a, b) = mesh.spawn_known_pair("Phone", "Laptop").await;
    start_both(&a, &b).await;
    a.wait_connected_to(&b).await;

    a.handle.forget(b.user_id().clone(), true).await.unwrap();

    assert_eq!(a.handle.blocked_users().await.unwrap(), vec![b.user_id().clone()]);
    assert!(a.handle.known_peers().await.unwrap().is_empty());
    eventually("remote forget", || async { b.handle.known_peers().await.unwrap().is_empty() }).await;
    assert!(b.handle.blocked_users().await.unwrap().is_empty());

    // A blocked user can no longer get in, even by invitation.
    eventually("rediscovery", || async { b.record_of(a.user_id()).await.is_some() }).await;
    let record = b.record_of(a.user_id()).await.unwrap();
    if record.state.is_invitable() {
        b.handle.invite(record.handle).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!a.is_connected_to(b.user_id()).await);
}

#[tokio::test]
async fn test_known_peer_leaving_range_is_kept_and_reconnects() {
    let mesh = TestMesh::new();
    let (a, b) = mesh.spawn_known_pair("Phone", "Laptop").await;
    start_both(&a, &b).await;
    a.wait_connected_to(&b).await;

    mesh.network.set_in_range(&b.identity.device, false).await;
    eventually("disconnect", || async {
        a.record_of(b.user_id())
            .await
            .is_some_and(|r| r.state == PeerState::Disconnected && !r.is_nearby)
    })
    .await;

    mesh.network.set_in_range(&b.identity.device, true).await;
    a.wait_connected_to(&b).await;
    let records: Vec<_> = a
        .handle
        .peers()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.matches_user(b.user_id()))
        .collect();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_rediscovery_under_new_handle_reuses_record() {
    let mesh = TestMesh::new();
    let (a_setup, b_setup) = mesh.prepare_known_pair("Phone", "Laptop").await;
    let b_store = b_setup.store.clone();
    let a = mesh.launch(a_setup).await;
    let b = mesh.launch(b_setup).await;
    start_both(&a, &b).await;
    a.wait_connected_to(&b).await;

    // The laptop walks away, is renamed and comes back as a new device
    // instance with the same user id.
    mesh.network.set_in_range(&b.identity.device, false).await;
    b.handle.shutdown().await.unwrap();
    eventually("disconnect", || async {
        a.record_of(b.user_id())
            .await
            .is_some_and(|r| r.state == PeerState::Disconnected)
    })
    .await;

    let identity = huddle::get_or_create_local_identity(b_store.as_ref(), "Laptop (work)")
        .await
        .unwrap();
    assert_eq!(&identity.user_id, b.user_id());
    assert_ne!(identity.device, b.identity.device);
    let b2 = mesh
        .launch(huddle_testkit::DeviceSetup {
            identity,
            store: b_store,
            config: NodeConfig::named("Laptop (work)"),
        })
        .await;
    b2.handle.start().await.unwrap();

    a.wait_connected_to(&b2).await;
    let records: Vec<_> = a
        .handle
        .peers()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.matches_user(b2.user_id()))
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].handle, b2.identity.device);
    assert!(a
        .handle
        .known_peers()
        .await
        .unwrap()
        .iter()
        .any(|p| &p.user_id == b2.user_id() && p.sync_enabled));
}

#[tokio::test]
async fn test_capacity_warning() {
    let mesh = TestMesh::new();
    let (mut a_setup, b_setup) = mesh.prepare_known_pair("Phone", "Laptop").await;
    a_setup.config.capacity_warning_threshold = 1;
    let mut a = mesh.launch(a_setup).await;
    let b = mesh.launch(b_setup).await;
    start_both(&a, &b).await;

    let event = a
        .wait_for(|e| matches!(e, NodeEvent::CapacityWarning { .. }))
        .await;
    assert_eq!(event, NodeEvent::CapacityWarning { connected: 1, max: 8 });
}

#[tokio::test]
async fn test_disabled_sync_stops_history_exchange() {
    let mesh = TestMesh::new();
    let (a, b) = mesh.spawn_known_pair("Phone", "Laptop").await;
    start_both(&a, &b).await;
    a.wait_connected_to(&b).await;
    b.wait_connected_to(&a).await;

    assert!(b.handle.set_sync_enabled(a.user_id().clone(), false).await.unwrap());
    let sent = a.handle.send_message("are you there?").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!b.user_message_ids().await.contains(&sent.id));

    // Disabling sync keeps what was already there.
    assert!(a.user_message_ids().await.contains(&sent.id));
}
