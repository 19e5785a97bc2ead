//! Unbounded FIFO between the inbound network handlers and the processing loop
//!
//! Producers never wait: `enqueue` hands the item over and returns. The
//! single consumer suspends in `dequeue` until an item arrives or it is
//! cancelled. There is no capacity limit; under a sustained imbalance the
//! queue grows instead of blocking the network side.

use std::fmt;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Create a connected writer/reader pair
pub fn background_queue<T>() -> (QueueWriter<T>, QueueReader<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueWriter { tx }, QueueReader { rx })
}

/// Producer side of the queue
pub struct QueueWriter<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for QueueWriter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for QueueWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueWriter")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T> QueueWriter<T> {
    /// Append an item; fails only once the reader has been dropped
    pub fn enqueue(&self, item: T) -> Result<(), QueueClosed<T>> {
        self.tx.send(item).map_err(|e| QueueClosed(e.0))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the queue
#[derive(Debug)]
pub struct QueueReader<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> QueueReader<T> {
    /// Wait for the next item.
    ///
    /// Returns [`DequeueError::Cancelled`] as soon as `cancel` fires, even if
    /// items are still pending.
    pub async fn dequeue(&mut self, cancel: &CancellationToken) -> Result<T, DequeueError> {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(DequeueError::Cancelled),

            item = self.rx.recv() => item.ok_or(DequeueError::Closed),
        }
    }

    /// Number of items waiting to be dequeued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Returned by `enqueue` when nobody will ever read the item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the queue reader has been dropped")
    }
}

impl<T: fmt::Debug> std::error::Error for QueueClosed<T> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueError {
    /// The caller's cancellation token fired
    Cancelled,

    /// Every writer has been dropped and the queue is drained
    Closed,
}

impl fmt::Display for DequeueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DequeueError::Cancelled => write!(f, "dequeue cancelled"),
            DequeueError::Closed => write!(f, "queue closed"),
        }
    }
}

impl std::error::Error for DequeueError {}
