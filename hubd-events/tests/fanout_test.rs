use std::sync::Arc;

use hubd_events::{EventHub, HubEvent};

fn hub(capacity: usize) -> EventHub {
    EventHub::new(capacity, None)
}

fn event(event_type: &str, user: Option<&str>) -> HubEvent {
    match user {
        Some(user) => HubEvent::for_user(event_type, user, serde_json::json!({"k": 1})),
        None => HubEvent::broadcast(event_type, serde_json::json!({"k": 1})),
    }
}

#[tokio::test]
async fn send_to_user_reaches_all_of_their_connections() {
    let hub = hub(16);
    let mut alice1 = hub.add_connection("alice", "c1", None).await;
    let mut alice2 = hub.add_connection("alice", "c2", None).await;
    let mut bob = hub.add_connection("bob", "c3", None).await;

    let delivered = hub.send_to_user("alice", event("e1", Some("alice"))).await;
    assert_eq!(delivered, 2);
    assert_eq!(alice1.recv().await.unwrap().event_type, "e1");
    assert_eq!(alice2.recv().await.unwrap().event_type, "e1");

    // Bob saw nothing.
    tokio::select! {
        _ = bob.recv() => panic!("bob should not receive alice's event"),
        _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
    }
}

#[tokio::test]
async fn broadcast_reaches_everyone() {
    let hub = hub(16);
    let mut alice1 = hub.add_connection("alice", "c1", None).await;
    let mut alice2 = hub.add_connection("alice", "c2", None).await;
    let mut bob = hub.add_connection("bob", "c3", None).await;

    let delivered = hub.broadcast(event("e2", None)).await;
    assert_eq!(delivered, 3);
    for client in [&mut alice1, &mut alice2, &mut bob] {
        assert_eq!(client.recv().await.unwrap().event_type, "e2");
    }
}

#[tokio::test]
async fn closed_connection_stops_receiving() {
    let hub = hub(16);
    let mut alice1 = hub.add_connection("alice", "c1", None).await;
    let mut alice2 = hub.add_connection("alice", "c2", None).await;

    hub.remove_connection("alice", "c1").await;
    assert!(alice1.recv().await.is_none(), "closed client should end");

    let delivered = hub.send_to_user("alice", event("e3", Some("alice"))).await;
    assert_eq!(delivered, 1);
    assert_eq!(alice2.recv().await.unwrap().event_type, "e3");
    assert_eq!(hub.connection_count().await, 1);
}

#[tokio::test]
async fn events_arrive_in_fifo_order() {
    let hub = hub(64);
    let mut alice = hub.add_connection("alice", "c1", None).await;
    for i in 0..10 {
        hub.send_to_user("alice", event(&format!("e{i}"), Some("alice")))
            .await;
    }
    for i in 0..10 {
        assert_eq!(alice.recv().await.unwrap().event_type, format!("e{i}"));
    }
}

#[tokio::test]
async fn overflow_drops_oldest_and_counts() {
    let hub = Arc::new(EventHub::new(4, None));
    let mut alice = hub.add_connection("alice", "c1", None).await;
    for i in 0..10 {
        hub.send_to_user("alice", event(&format!("e{i}"), Some("alice")))
            .await;
    }
    // The first events were evicted; the survivors arrive in order.
    let first = alice.recv().await.unwrap();
    assert_ne!(first.event_type, "e0");
    assert!(hub.dropped_count() > 0);
    let second = alice.recv().await.unwrap();
    let first_n: u32 = first.event_type[1..].parse().unwrap();
    let second_n: u32 = second.event_type[1..].parse().unwrap();
    assert_eq!(second_n, first_n + 1);
}

#[tokio::test]
async fn send_to_unknown_user_is_a_noop() {
    let hub = hub(16);
    assert_eq!(hub.send_to_user("ghost", event("e", Some("ghost"))).await, 0);
}
