//! Queue → pump → broadcaster, alone and wired into the hub pipeline

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use server_monitor::config::HubConfig;
use server_monitor::hub::Pipeline;
use server_monitor::logging::LogMessage;
use server_monitor::notifications::{NotificationManager, NotificationService, background_queue};
use server_monitor::storage::{MemoryMetricsRepository, Repository};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::helpers::*;

async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}

#[tokio::test]
async fn test_items_wait_for_first_subscriber() {
    let (writer, reader) = background_queue::<u32>();
    let manager = NotificationManager::new();
    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();
    let pump = NotificationService::new(reader, manager.clone()).spawn(&tracker, cancel.clone());

    for item in 1..=3 {
        writer.enqueue(item).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!manager.is_gate_open());

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let _subscription = manager.subscribe(move |item: &u32| {
        sink.lock().unwrap().push(*item);
        Ok(())
    });

    eventually(|| received.lock().unwrap().len() == 3).await;
    assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);

    cancel.cancel();
    assert_eq!(pump.await.unwrap(), 3);
}

#[tokio::test]
async fn test_pump_stops_when_writers_are_gone() {
    let (writer, reader) = background_queue::<u32>();
    let manager = NotificationManager::new();
    let _subscription = manager.subscribe(|_: &u32| Ok(()));
    let tracker = TaskTracker::new();

    let pump = NotificationService::new(reader, manager).spawn(&tracker, CancellationToken::new());
    writer.enqueue(7).unwrap();
    drop(writer);

    let published = tokio::time::timeout(Duration::from_secs(5), pump)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(published, 1);
}

#[tokio::test]
async fn test_hub_pipeline_stores_and_reports_readings() {
    let repository = Arc::new(MemoryMetricsRepository::new());
    let pipeline = Pipeline::start(&HubConfig::default(), repository.clone(), None);
    let state = pipeline.state();

    let now = Utc::now();
    state
        .metrics_queue
        .enqueue(create_server_metrics("10.0.0.1", 10.0, now))
        .unwrap();
    state
        .metrics_queue
        .enqueue(create_server_metrics("10.0.0.2", 20.0, now))
        .unwrap();

    eventually(|| state.report.len() == 2).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while repository.get_all().await.unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let stats = state.processor.get_stats().await.unwrap();
    assert_eq!(stats.processed, 2);

    tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
        .await
        .unwrap();
    assert!(state.shutdown.is_cancelled());
}

#[tokio::test]
async fn test_hub_pipeline_collects_log_lines() {
    let (log_writer, log_reader) = background_queue();
    let pipeline = Pipeline::start(
        &HubConfig::default(),
        Arc::new(MemoryMetricsRepository::new()),
        Some(log_reader),
    );
    let state = pipeline.state();

    for body in ["first", "second"] {
        log_writer
            .enqueue(LogMessage {
                source: "server_monitor::hub".to_string(),
                body: body.to_string(),
                level: "INFO".to_string(),
                thread: "main".to_string(),
                timestamp: Utc::now(),
            })
            .unwrap();
    }

    eventually(|| state.logs.recent(10).len() == 2).await;
    let bodies: Vec<String> = state
        .logs
        .recent(10)
        .into_iter()
        .map(|line| line.body)
        .collect();
    assert_eq!(bodies, vec!["first", "second"]);
    assert_eq!(state.logs.recent(1)[0].body, "second");

    pipeline.shutdown().await;
}
