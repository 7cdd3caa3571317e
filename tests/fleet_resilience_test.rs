// Failover, retry and invalidation tests against an in-memory host fleet

mod support;

use dache_client::transport::framing::encode_segments;
use dache_client::{CacheClient, CacheError, CacheEvent, HostEndpoint, WritePolicy};
use std::time::Duration;
use support::{init_tracing, next_event, settings, MockFleet};

const FOUR_HOSTS: &[(&str, u16)] = &[
    ("10.0.0.1", 1),
    ("10.0.0.2", 1),
    ("10.0.0.3", 1),
    ("10.0.0.4", 1),
];

#[tokio::test]
async fn test_transient_transport_failure_is_retried_until_success() {
    init_tracing();
    let fleet = MockFleet::new();
    let client = CacheClient::connect(settings(&[("10.0.0.1", 1), ("10.0.0.2", 1)], 1), fleet.clone())
        .await
        .unwrap();

    fleet.host("10.0.0.1", 1).fail_next(1);
    client
        .add_or_update("user:42", &"alpha".to_string(), WritePolicy::default())
        .await
        .unwrap();

    assert!(fleet.host("10.0.0.1", 1).contains_key("user:42"));
    assert!(fleet.host("10.0.0.2", 1).contains_key("user:42"));
}

#[tokio::test]
async fn test_bulk_get_retries_when_one_bucket_fails_mid_call() {
    let fleet = MockFleet::new();
    let client = CacheClient::connect(settings(FOUR_HOSTS, 1), fleet.clone())
        .await
        .unwrap();

    client
        .add_or_update("a", &"first".to_string(), WritePolicy::default())
        .await
        .unwrap();
    client
        .add_or_update("b", &"second".to_string(), WritePolicy::default())
        .await
        .unwrap();

    // both replicas of bucket 1 fail once, so the first whole-batch
    // attempt dies and the retry succeeds
    fleet.host("10.0.0.3", 1).fail_next(1);
    fleet.host("10.0.0.4", 1).fail_next(1);

    let values: Vec<Option<String>> = client
        .get_bulk(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();

    assert_eq!(
        values,
        vec![Some("first".to_string()), Some("second".to_string())]
    );
}

#[tokio::test]
async fn test_failover_reroutes_and_recovers() {
    init_tracing();
    let fleet = MockFleet::new();
    let client = CacheClient::connect(settings(FOUR_HOSTS, 1), fleet.clone())
        .await
        .unwrap();
    let mut events = client.subscribe();

    // bucket 1 ("b" routes there) loses both members
    fleet.host("10.0.0.3", 1).emit_disconnected().await;
    fleet.host("10.0.0.4", 1).emit_disconnected().await;
    assert_eq!(
        next_event(&mut events).await,
        CacheEvent::HostDisconnected(HostEndpoint::new("10.0.0.3", 1))
    );
    assert_eq!(
        next_event(&mut events).await,
        CacheEvent::HostDisconnected(HostEndpoint::new("10.0.0.4", 1))
    );
    assert_eq!(client.routing_table().offline_indices(), vec![1]);

    // writes for the shadowed bucket land on its serving successor
    client
        .add_or_update("b", &"rerouted".to_string(), WritePolicy::default())
        .await
        .unwrap();
    assert!(fleet.host("10.0.0.1", 1).contains_key("b"));
    assert!(fleet.host("10.0.0.2", 1).contains_key("b"));
    assert!(!fleet.host("10.0.0.3", 1).contains_key("b"));

    // one member coming back unshadows the bucket and routing returns
    fleet.host("10.0.0.3", 1).emit_reconnected().await;
    assert_eq!(
        next_event(&mut events).await,
        CacheEvent::HostReconnected(HostEndpoint::new("10.0.0.3", 1))
    );
    assert!(client.routing_table().offline_indices().is_empty());

    client
        .add_or_update("b", &"home again".to_string(), WritePolicy::default())
        .await
        .unwrap();
    assert!(fleet.host("10.0.0.3", 1).contains_key("b"));
}

#[tokio::test]
async fn test_repeated_disconnect_signals_raise_one_event() {
    let fleet = MockFleet::new();
    let client = CacheClient::connect(settings(&[("10.0.0.1", 1), ("10.0.0.2", 1)], 1), fleet.clone())
        .await
        .unwrap();
    let mut events = client.subscribe();

    fleet.host("10.0.0.1", 1).emit_disconnected().await;
    fleet.host("10.0.0.1", 1).emit_disconnected().await;

    assert_eq!(
        next_event(&mut events).await,
        CacheEvent::HostDisconnected(HostEndpoint::new("10.0.0.1", 1))
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_exhausted_fleet_surfaces_no_cache_hosts() {
    let fleet = MockFleet::new();
    let client = CacheClient::connect(settings(&[("10.0.0.1", 1), ("10.0.0.2", 1)], 0), fleet.clone())
        .await
        .unwrap();
    let mut events = client.subscribe();

    fleet.host("10.0.0.1", 1).emit_disconnected().await;
    fleet.host("10.0.0.2", 1).emit_disconnected().await;
    next_event(&mut events).await;
    next_event(&mut events).await;

    assert!(matches!(
        client.try_get::<String>("user:42").await,
        Err(CacheError::NoCacheHostsAvailable)
    ));
    assert!(matches!(
        client
            .add_or_update("user:42", &0u8, WritePolicy::default())
            .await,
        Err(CacheError::NoCacheHostsAvailable)
    ));
}

#[tokio::test]
async fn test_expire_push_raises_events_in_order() {
    let fleet = MockFleet::new();
    let client = CacheClient::connect(settings(&[("10.0.0.1", 1)], 0), fleet.clone())
        .await
        .unwrap();
    let mut events = client.subscribe();

    fleet
        .host("10.0.0.1", 1)
        .push_message(encode_segments(&["expire", "a", "b"]))
        .await;

    assert_eq!(
        next_event(&mut events).await,
        CacheEvent::CacheItemExpired {
            cache_key: "a".to_string()
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        CacheEvent::CacheItemExpired {
            cache_key: "b".to_string()
        }
    );
}

#[tokio::test]
async fn test_unknown_push_commands_are_ignored() {
    let fleet = MockFleet::new();
    let client = CacheClient::connect(settings(&[("10.0.0.1", 1)], 0), fleet.clone())
        .await
        .unwrap();
    let mut events = client.subscribe();

    fleet
        .host("10.0.0.1", 1)
        .push_message(encode_segments(&["defragment", "a"]))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(events.try_recv().is_err());
}
