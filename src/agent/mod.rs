//! Agent side of the pipeline: read the local machine and push snapshots to
//! the hub

pub mod connection;
pub mod retry;
pub mod source;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState};
pub use retry::RetryPolicy;
pub use source::{SnapshotSource, SystemSnapshotSource};
pub use transport::{MessageSink, MessageStream, Transport, WebSocketTransport};
