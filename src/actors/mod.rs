//! Subscribers of the hub's metrics and log streams
//!
//! ## Architecture Overview
//!
//! ```text
//!              NotificationManager<ServerMetrics>
//!                  │ subscribe          │ subscribe
//!        ┌─────────▼────────┐   ┌───────▼───────┐
//!        │ MetricsProcessor │   │ MetricsReport │
//!        │ (own task)       │   │ (in listener) │
//!        └─────────┬────────┘   └───────────────┘
//!                  │ create
//!          MetricsRepository
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Events**: listeners registered on a broadcaster receive every item
//! 2. **Commands**: the processor has an mpsc command channel
//! 3. **Request/Response**: oneshot channels for statistics

pub mod messages;
pub mod processing;
pub mod report;

pub use processing::{MetricsProcessor, MetricsProcessorHandle};
pub use report::{LogReport, MetricsReport, ServerStatus};
