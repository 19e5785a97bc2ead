//! Ingestion and fan-out primitives shared by the hub's streams
//!
//! ```text
//!  inbound handlers ──enqueue──▶ [QueueWriter ─ QueueReader]
//!                                              │ dequeue
//!                                   NotificationService (pump)
//!                                              │ publish
//!                                  NotificationManager (broadcaster)
//!                              ┌───────────────┼───────────────┐
//!                       MetricsProcessor  MetricsReport   ws handlers
//! ```
//!
//! Each topic (metrics, logs, configuration) gets its own queue and
//! broadcaster; nothing is shared between topics.

pub mod manager;
pub mod queue;
pub mod service;

pub use manager::{Delivery, NotificationManager, Subscription};
pub use queue::{DequeueError, QueueClosed, QueueReader, QueueWriter, background_queue};
pub use service::NotificationService;
