//! Repository behaviour through the trait objects the hub uses

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use server_monitor::actors::MetricsProcessorHandle;
use server_monitor::notifications::NotificationManager;
use server_monitor::storage::query::QueryBuilder;
use server_monitor::storage::schema::metrics_table_definition;
use server_monitor::storage::{
    MemoryMetricsRepository, MetricsRepository, Repository, StorageError,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::helpers::*;

#[tokio::test]
async fn test_memory_repository_through_trait_object() {
    let repository: Arc<dyn MetricsRepository> = Arc::new(MemoryMetricsRepository::new());
    repository.initialize().await.unwrap();

    let now = Utc::now();
    repository
        .insert(&create_server_metrics("10.0.0.1", 12.5, now))
        .await
        .unwrap();
    repository
        .create(&create_server_metrics("10.0.0.2", 50.0, now))
        .await;

    let rows = repository.get_all().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].metrics_id, 1);
    assert_eq!(rows[1].metrics_id, 2);
    assert_eq!(rows[0].cpu_usage_percent, 12.5);
    assert_eq!(rows[0].memory_available_mbytes, 4096);
    assert_eq!(rows[0].memory_total_mbytes, 16384);

    assert_eq!(repository.get(2).await.unwrap(), rows[1]);
    assert_matches!(repository.get(3).await, Err(StorageError::NotFound(3)));
}

#[tokio::test]
async fn test_readings_are_append_only() {
    let repository: Arc<dyn MetricsRepository> = Arc::new(MemoryMetricsRepository::new());
    let metrics = create_server_metrics("10.0.0.1", 12.5, Utc::now());
    repository.insert(&metrics).await.unwrap();

    assert_matches!(
        repository.remove(1).await,
        Err(StorageError::Unsupported("remove"))
    );
    assert_matches!(
        repository.update(1, &metrics).await,
        Err(StorageError::Unsupported("update"))
    );
    assert_eq!(repository.get_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_latest_per_source() {
    let repository = MemoryMetricsRepository::new();
    let now = Utc::now();

    for (ip, cpu, age) in [
        ("10.0.0.1", 1.0, 30),
        ("10.0.0.2", 2.0, 20),
        ("10.0.0.1", 3.0, 10),
        ("10.0.0.2", 4.0, 40),
    ] {
        repository
            .insert(&create_server_metrics(ip, cpu, now - ChronoDuration::seconds(age)))
            .await
            .unwrap();
    }

    let latest = repository.get_latest_per_source().await.unwrap();
    let summary: Vec<(String, f32)> = latest
        .iter()
        .map(|row| (row.ip_address.to_string(), row.cpu_usage_percent))
        .collect();

    assert_eq!(
        summary,
        vec![("10.0.0.1".to_string(), 3.0), ("10.0.0.2".to_string(), 2.0)]
    );
}

#[tokio::test]
async fn test_health_check_reports_row_count() {
    let repository = MemoryMetricsRepository::new();
    repository
        .insert(&create_server_metrics("10.0.0.1", 1.0, Utc::now()))
        .await
        .unwrap();

    let health = repository.health_check().await.unwrap();
    assert!(health.healthy);
    assert_eq!(health.metadata.get("total_metrics"), Some(&"1".to_string()));
}

#[tokio::test]
async fn test_processor_persists_published_readings() {
    let repository = Arc::new(MemoryMetricsRepository::new());
    let manager = NotificationManager::new();
    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();

    let processor =
        MetricsProcessorHandle::spawn(&manager, repository.clone(), &tracker, cancel.clone());

    let now = Utc::now();
    for cpu in [1.0, 2.0, 3.0] {
        manager
            .publish(&create_server_metrics("10.0.0.1", cpu, now))
            .await;
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while repository.len().await < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let stats = processor.get_stats().await.unwrap();
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.pending, 0);

    let cpus: Vec<f32> = repository
        .get_all()
        .await
        .unwrap()
        .iter()
        .map(|row| row.cpu_usage_percent)
        .collect();
    assert_eq!(cpus, vec![1.0, 2.0, 3.0]);

    processor.shutdown().await;
    tracker.close();
    tracker.wait().await;
    assert_eq!(manager.subscriber_count(), 0);
}

#[test]
fn test_metrics_table_definition() {
    assert_eq!(
        metrics_table_definition("metrics").unwrap(),
        "CREATE TABLE metrics (\
         metrics_id serial PRIMARY KEY,\
         ip_address cidr NOT NULL,\
         cpu_usage_percent real NOT NULL,\
         memory_available_mbytes int NOT NULL,\
         memory_total_mbytes int NOT NULL,\
         timestamp timestamp NOT NULL);"
    );
}

#[test]
fn test_select_builder_matches_report_query() {
    let sql = QueryBuilder::select("metrics")
        .unwrap()
        .columns(&["ip_address", "timestamp"])
        .unwrap()
        .order_by("timestamp DESC")
        .unwrap()
        .build();

    assert_eq!(
        sql,
        "SELECT ip_address, timestamp FROM metrics ORDER BY timestamp DESC;"
    );
}
