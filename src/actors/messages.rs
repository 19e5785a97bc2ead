//! Message types for actor communication
//!
//! Commands are sent to a specific actor over its mpsc channel; answers come
//! back on a oneshot channel carried inside the command.

use serde::Serialize;
use tokio::sync::oneshot;

/// Commands that can be sent to the MetricsProcessor
#[derive(Debug)]
pub enum ProcessorCommand {
    /// Get processing statistics
    GetStats {
        respond_to: oneshot::Sender<ProcessorStats>,
    },

    /// Stop processing and release the subscription
    Shutdown,
}

/// Counters reported by the MetricsProcessor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    /// Readings handed to the repository
    pub processed: u64,

    /// Readings received but not yet handed to the repository
    pub pending: usize,
}
