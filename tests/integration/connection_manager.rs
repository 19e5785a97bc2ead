//! Connection manager behaviour against an in-process transport
//!
//! All tests run on a paused clock, so the reconnect delays below are exact.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use server_monitor::agent::{ConnectionManager, ConnectionState};
use server_monitor::protocol::{AgentMessage, HubMessage};
use server_monitor::{ConfigurationMessage, MetricsSnapshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

const DELAY: Duration = Duration::from_millis(1000);

fn snapshot_source() -> impl Fn() -> anyhow::Result<MetricsSnapshot> + Send + Sync {
    || Ok(create_snapshot(10.0))
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_over_to_next_endpoint_after_delay() {
    let (transport, mut accepted) = MockTransport::new();
    transport.fail_always(&endpoint(7143));

    let manager = ConnectionManager::new(
        transport.clone(),
        snapshot_source(),
        create_agent_config("7143,5000", 5000, 1000),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let connected = manager.start(&cancel).await;

    assert_eq!(connected, Some(endpoint(5000)));
    assert!(manager.is_connected());
    assert_eq!(accepted.recv().await.unwrap().endpoint, endpoint(5000));

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].0, endpoint(7143));
    assert_eq!(attempts[1].0, endpoint(5000));
    assert_eq!(attempts[1].1 - attempts[0].1, DELAY);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_start_wraps_around_to_first_endpoint() {
    let (transport, _accepted) = MockTransport::new();
    transport.fail_next(&endpoint(7143), 1);
    transport.fail_always(&endpoint(5000));

    let manager = ConnectionManager::new(
        transport.clone(),
        snapshot_source(),
        create_agent_config("7143,5000", 5000, 1000),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    assert_eq!(manager.start(&cancel).await, Some(endpoint(7143)));

    let attempts = transport.attempts();
    let order: Vec<&str> = attempts.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(order, vec![endpoint(7143), endpoint(5000), endpoint(7143)]);
    assert_eq!(attempts[2].1 - attempts[0].1, DELAY * 2);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_start_returns_none_when_cancelled() {
    let (transport, _accepted) = MockTransport::new();
    transport.fail_always(&endpoint(7143));

    let manager = ConnectionManager::new(
        transport,
        snapshot_source(),
        create_agent_config("7143", 5000, 1000),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(3500)).await;
        canceller.cancel();
    });

    assert_eq!(manager.start(&cancel).await, None);
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_invalid_port_is_rejected() {
    let (transport, _accepted) = MockTransport::new();

    let result = ConnectionManager::new(
        transport,
        snapshot_source(),
        create_agent_config("7143,http", 5000, 1000),
    );

    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_configuration_push_replaces_update_interval() {
    let (transport, mut accepted) = MockTransport::new();
    let manager = ConnectionManager::new(
        transport,
        snapshot_source(),
        create_agent_config("7143", 5000, 1000),
    )
    .unwrap();
    let mut configuration = manager.configuration();

    let cancel = CancellationToken::new();
    manager.start(&cancel).await.unwrap();
    let mut hub = accepted.recv().await.unwrap();

    hub.push(HubMessage::ReceiveConfiguration(ConfigurationMessage::new(10)))
        .await;
    configuration.changed().await.unwrap();

    let updated = configuration.borrow().clone();
    assert_eq!(updated.update_interval_ms, 10_000);
    // everything else is untouched
    assert_eq!(updated.reconnect_delay_ms, 1000);
    assert_eq!(updated.ports, "7143");

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_run_sends_one_snapshot_per_interval() {
    let (transport, mut accepted) = MockTransport::new();
    let manager = Arc::new(
        ConnectionManager::new(
            transport,
            snapshot_source(),
            create_agent_config("7143", 2000, 1000),
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let runner = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };

    let mut hub = accepted.recv().await.unwrap();
    let mut arrivals = Vec::new();
    for _ in 0..3 {
        let message = hub.received.next().await.unwrap();
        assert!(matches!(message, AgentMessage::SendMetrics(_)));
        arrivals.push(Instant::now());
    }

    assert_eq!(arrivals[1] - arrivals[0], Duration::from_millis(2000));
    assert_eq!(arrivals[2] - arrivals[1], Duration::from_millis(2000));

    cancel.cancel();
    runner.await.unwrap();
    assert_eq!(*manager.state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_pushed_interval_applies_to_next_sleep() {
    let (transport, mut accepted) = MockTransport::new();
    let manager = Arc::new(
        ConnectionManager::new(
            transport,
            snapshot_source(),
            create_agent_config("7143", 2000, 1000),
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let runner = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };

    let mut hub = accepted.recv().await.unwrap();
    hub.received.next().await.unwrap();

    let mut configuration = manager.configuration();
    hub.push(HubMessage::ReceiveConfiguration(ConfigurationMessage::new(7)))
        .await;
    configuration.changed().await.unwrap();

    // the sleep already running keeps its 2s; the one after uses 7s
    hub.received.next().await.unwrap();
    let before = Instant::now();
    hub.received.next().await.unwrap();
    assert_eq!(Instant::now() - before, Duration::from_secs(7));

    cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_is_immediate_then_waits_fixed_delay() {
    let (transport, mut accepted) = MockTransport::new();
    let manager = ConnectionManager::new(
        transport.clone(),
        snapshot_source(),
        create_agent_config("7143,5000", 5000, 1000),
    )
    .unwrap();
    let mut state = manager.state();

    let cancel = CancellationToken::new();
    manager.start(&cancel).await.unwrap();
    let hub = accepted.recv().await.unwrap();

    transport.fail_next(&endpoint(7143), 2);
    let dropped_at = Instant::now();
    drop(hub);

    let reconnected = accepted.recv().await.unwrap();
    // reconnects to the same endpoint, never fails over
    assert_eq!(reconnected.endpoint, endpoint(7143));

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 4);
    assert!(attempts.iter().all(|(e, _)| *e == endpoint(7143)));
    assert!(attempts[1].1 - dropped_at < Duration::from_millis(1));
    assert_eq!(attempts[2].1 - attempts[1].1, DELAY);
    assert_eq!(attempts[3].1 - attempts[2].1, DELAY);

    state
        .wait_for(|state| state.is_connected())
        .await
        .unwrap();

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_state_is_reconnecting_while_connection_is_down() {
    let (transport, mut accepted) = MockTransport::new();
    let manager = ConnectionManager::new(
        transport.clone(),
        snapshot_source(),
        create_agent_config("7143", 5000, 1000),
    )
    .unwrap();
    let mut state = manager.state();

    let cancel = CancellationToken::new();
    manager.start(&cancel).await.unwrap();
    let hub = accepted.recv().await.unwrap();

    transport.fail_always(&endpoint(7143));
    drop(hub);

    let current = state
        .wait_for(|state| !state.is_connected())
        .await
        .unwrap()
        .clone();
    assert_eq!(
        current,
        ConnectionState::Reconnecting {
            endpoint: endpoint(7143)
        }
    );
    assert!(!manager.send_snapshot().await.unwrap());

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_send_error_hands_the_connection_back_for_reconnect() {
    let (transport, mut accepted) = MockTransport::new();
    let manager = ConnectionManager::new(
        transport.clone(),
        snapshot_source(),
        create_agent_config("7143", 5000, 1000),
    )
    .unwrap();
    let mut state = manager.state();

    let cancel = CancellationToken::new();
    manager.start(&cancel).await.unwrap();
    let HubSide { received, push, .. } = accepted.recv().await.unwrap();
    drop(received);

    assert!(manager.send_snapshot().await.is_err());
    assert_eq!(
        *state.borrow_and_update(),
        ConnectionState::Reconnecting {
            endpoint: endpoint(7143)
        }
    );

    // first retry is immediate
    let started = Instant::now();
    let mut hub = accepted.recv().await.unwrap();
    state.wait_for(|state| state.is_connected()).await.unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);

    assert!(manager.send_snapshot().await.unwrap());
    assert!(matches!(
        hub.received.next().await,
        Some(AgentMessage::SendMetrics(_))
    ));

    cancel.cancel();
    drop(push);
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_drops_the_connection_and_reconnects() {
    let (transport, mut accepted) = MockTransport::new();

    let manager = Arc::new(
        ConnectionManager::new(
            transport.clone(),
            snapshot_source(),
            create_agent_config("7143", 1000, 1000),
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let runner = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };

    // these hubs stop reading but keep their side open, so only the
    // failing send tells the agent the connection is gone
    let mut open = Vec::new();
    for _ in 0..3 {
        let HubSide { received, push, .. } = accepted.recv().await.unwrap();
        drop(received);
        open.push(push);
    }

    let mut hub = accepted.recv().await.unwrap();
    let message = hub.received.next().await.unwrap();
    assert!(matches!(message, AgentMessage::SendMetrics(_)));
    assert!(manager.is_connected());
    assert_eq!(transport.attempts().len(), 4);

    // the loop survived every failure
    assert!(!runner.is_finished());
    cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_source_errors_do_not_stop_the_loop() {
    let (transport, mut accepted) = MockTransport::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let source = {
        let calls = calls.clone();
        move || -> anyhow::Result<MetricsSnapshot> {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("sensor unavailable");
            }
            Ok(create_snapshot(10.0))
        }
    };

    let manager = Arc::new(
        ConnectionManager::new(transport, source, create_agent_config("7143", 1000, 1000))
            .unwrap(),
    );

    let cancel = CancellationToken::new();
    let runner = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };

    let mut hub = accepted.recv().await.unwrap();
    let message = hub.received.next().await.unwrap();
    assert!(matches!(message, AgentMessage::SendMetrics(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    cancel.cancel();
    runner.await.unwrap();
}
