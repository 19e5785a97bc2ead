//! PostgreSQL metrics store
//!
//! ## Layout
//!
//! One table (name configurable, `metrics` by default) in a dedicated
//! database. `initialize` creates both when missing, connecting to the
//! server's `postgres` maintenance database for the `CREATE DATABASE`.
//!
//! Addresses are stored as `cidr` and read back through `host()` so they
//! come out as plain text without a prefix length. Timestamps are stored
//! without time zone and are always UTC.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, Executor, PgConnection, Row};
use tracing::{debug, info, instrument, warn};

use super::error::{StorageError, StorageResult};
use super::query::QueryBuilder;
use super::repository::{HealthStatus, MetricsRepository, Repository};
use super::schema::{INSERT_COLUMNS, MetricsRow, metrics_table_definition};
use crate::ServerMetrics;
use crate::config::DatabaseConfig;

/// Columns selected for every read, with the address rendered as text
const SELECT_COLUMNS: [&str; 6] = [
    "metrics_id",
    "host(ip_address) AS ip_address",
    "cpu_usage_percent",
    "memory_available_mbytes",
    "memory_total_mbytes",
    "timestamp",
];

pub struct PostgresMetricsRepository {
    config: DatabaseConfig,
    pool: PgPool,
}

impl PostgresMetricsRepository {
    /// Create the repository without touching the network.
    ///
    /// The pool connects lazily, so the database may not exist yet; call
    /// [`MetricsRepository::initialize`] before the first read or write.
    pub fn new(config: DatabaseConfig) -> Self {
        info!(
            "using PostgreSQL at {}:{}/{}",
            config.host, config.port, config.database_name
        );

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy_with(config.database_options());

        Self { config, pool }
    }

    fn table(&self) -> &str {
        &self.config.metrics_table_name
    }

    async fn maintenance_connection(&self) -> StorageResult<PgConnection> {
        PgConnection::connect_with(&self.config.maintenance_options())
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))
    }

    /// Names of all databases on the server
    pub async fn list_databases(&self) -> StorageResult<Vec<String>> {
        let mut conn = self.maintenance_connection().await?;
        let databases = sqlx::query_scalar::<_, String>(QueryBuilder::DATABASE_LIST_QUERY)
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;
        Ok(databases)
    }

    /// Drop the metrics database if it exists.
    ///
    /// Must run before the pool is first used; open pool connections would
    /// keep the database from being dropped.
    #[instrument(skip(self), fields(database = %self.config.database_name))]
    pub async fn reset(&self) -> StorageResult<()> {
        warn!("dropping metrics database");

        let statement = QueryBuilder::drop_database_if_exists(&self.config.database_name)?;
        let mut conn = self.maintenance_connection().await?;
        conn.execute(statement.as_str()).await?;
        conn.close().await?;
        Ok(())
    }

    async fn table_exists(&self) -> StorageResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(self.table())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    fn read_row(row: &PgRow) -> StorageResult<MetricsRow> {
        let ip_address: String = row.try_get("ip_address")?;
        let ip_address: IpAddr = ip_address
            .parse()
            .map_err(|_| StorageError::InvalidRecord(format!("bad address {ip_address:?}")))?;
        let timestamp: NaiveDateTime = row.try_get("timestamp")?;

        Ok(MetricsRow {
            metrics_id: row.try_get("metrics_id")?,
            ip_address,
            cpu_usage_percent: row.try_get("cpu_usage_percent")?,
            memory_available_mbytes: row.try_get("memory_available_mbytes")?,
            memory_total_mbytes: row.try_get("memory_total_mbytes")?,
            timestamp: timestamp.and_utc(),
        })
    }
}

fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {table} ({}) VALUES ($1::cidr, $2, $3, $4, $5)",
        INSERT_COLUMNS.join(", ")
    )
}

fn latest_per_source_statement(table: &str) -> String {
    format!(
        "SELECT {} FROM (SELECT DISTINCT ON (ip_address) * FROM {table} \
         ORDER BY ip_address, timestamp DESC) AS latest ORDER BY latest.ip_address",
        SELECT_COLUMNS.join(", ")
    )
}

#[async_trait]
impl Repository for PostgresMetricsRepository {
    type Item = ServerMetrics;
    type Record = MetricsRow;

    #[instrument(skip_all, fields(ip = %item.ip_address()))]
    async fn insert(&self, item: &ServerMetrics) -> StorageResult<()> {
        let snapshot = item.snapshot();

        sqlx::query(&insert_statement(self.table()))
            .bind(item.ip_address().to_string())
            .bind(snapshot.processor_usage_percent())
            .bind(snapshot.available_memory_mbytes())
            .bind(snapshot.total_memory_mbytes())
            .bind(item.timestamp().naive_utc())
            .execute(&self.pool)
            .await?;

        debug!("metrics stored");
        Ok(())
    }

    async fn get_all(&self) -> StorageResult<Vec<MetricsRow>> {
        let statement = QueryBuilder::select(self.table())?
            .columns(&SELECT_COLUMNS)?
            .order_by("metrics_id")?
            .build();

        let rows = sqlx::query(&statement).fetch_all(&self.pool).await?;
        rows.iter().map(Self::read_row).collect()
    }

    async fn get(&self, id: i32) -> StorageResult<MetricsRow> {
        let statement = format!(
            "SELECT {} FROM {} WHERE metrics_id = $1",
            SELECT_COLUMNS.join(", "),
            self.table()
        );

        let row = sqlx::query(&statement)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound(id))?;

        Self::read_row(&row)
    }
}

#[async_trait]
impl MetricsRepository for PostgresMetricsRepository {
    #[instrument(skip(self), fields(database = %self.config.database_name))]
    async fn initialize(&self) -> StorageResult<()> {
        let databases = self.list_databases().await?;

        if !databases.contains(&self.config.database_name) {
            info!("creating database");
            let statement = QueryBuilder::create_database(&self.config.database_name)?;
            let mut conn = self.maintenance_connection().await?;
            conn.execute(statement.as_str()).await?;
            conn.close().await?;
        }

        if !self.table_exists().await? {
            info!("creating table {}", self.table());
            let statement = metrics_table_definition(self.table())?;
            self.pool.execute(statement.as_str()).await?;
        }

        info!("database ready");
        Ok(())
    }

    async fn get_latest_per_source(&self) -> StorageResult<Vec<MetricsRow>> {
        let rows = sqlx::query(&latest_per_source_statement(self.table()))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::read_row).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let mut metadata = HashMap::new();
        metadata.insert("backend".to_string(), "postgres".to_string());
        metadata.insert("database".to_string(), self.config.database_name.clone());

        // simple ping to verify the connection
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "PostgreSQL backend operational".to_string(),
                metadata,
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata,
                })
            }
        }
    }
}
