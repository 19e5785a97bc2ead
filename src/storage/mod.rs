//! Persistence for readings received by the hub
//!
//! ## Design
//!
//! - **Trait-based**: `MetricsRepository` lets the hub swap stores
//! - **Append-only**: readings are created and read, never edited
//! - **Lossy writes**: `Repository::create` logs failures and moves on
//!
//! ## Backends
//!
//! - **PostgreSQL**: used when a `database` section is configured
//! - **In-Memory**: fallback without persistence, also used by the tests

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod repository;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryMetricsRepository;
pub use postgres::PostgresMetricsRepository;
pub use repository::{HealthStatus, MetricsRepository, Repository};
pub use schema::MetricsRow;
