//! Tracing setup for both binaries
//!
//! Everything goes to stderr. The hub additionally turns each event into a
//! [`LogMessage`] and enqueues it on the log topic, where it is pumped to the
//! log report like any other stream. Events emitted by the notification
//! machinery itself are kept off that topic so publishing a log line can
//! never produce another one.

use std::io;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Level, Metadata, level_filters::LevelFilter};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::notifications::QueueWriter;

/// Target prefix excluded from the log topic
const NOTIFICATIONS_TARGET: &str = "server_monitor::notifications";

/// One log line as seen by log topic subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogMessage {
    /// Module that emitted the event
    pub source: String,

    pub body: String,

    pub level: String,

    pub thread: String,

    pub timestamp: DateTime<Utc>,
}

fn targets() -> filter::Targets {
    filter::Targets::new()
        .with_targets(vec![
            ("server_monitor", LevelFilter::TRACE),
            ("monitor_agent", LevelFilter::TRACE),
            ("monitor_hub", LevelFilter::TRACE),
            ("tower_http", LevelFilter::DEBUG),
        ])
        .with_default(LevelFilter::WARN)
}

/// stderr only
pub fn init() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(targets())
        .init();
}

/// stderr plus the hub's log topic
pub fn init_with_log_queue(queue: QueueWriter<LogMessage>) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false)
                .with_filter(targets()),
        )
        .with(log_queue_layer(queue))
        .init();
}

/// Formatting layer that enqueues INFO and above onto the log topic
pub fn log_queue_layer<S>(queue: QueueWriter<LogMessage>) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(LogQueueWriter::new(queue))
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_ansi(false)
        .with_filter(filter::filter_fn(is_published))
}

fn is_published(meta: &Metadata<'_>) -> bool {
    *meta.level() <= Level::INFO && !meta.target().starts_with(NOTIFICATIONS_TARGET)
}

/// [`MakeWriter`] handing out one [`LogLineWriter`] per event
#[derive(Debug, Clone)]
pub struct LogQueueWriter {
    queue: QueueWriter<LogMessage>,
}

impl LogQueueWriter {
    pub fn new(queue: QueueWriter<LogMessage>) -> Self {
        Self { queue }
    }
}

impl<'a> MakeWriter<'a> for LogQueueWriter {
    type Writer = LogLineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogLineWriter::new(self.queue.clone(), String::new(), Level::INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        LogLineWriter::new(self.queue.clone(), meta.target().to_string(), *meta.level())
    }
}

/// Buffers one formatted event and enqueues it when dropped
pub struct LogLineWriter {
    queue: QueueWriter<LogMessage>,
    source: String,
    level: Level,
    buffer: Vec<u8>,
}

impl LogLineWriter {
    fn new(queue: QueueWriter<LogMessage>, source: String, level: Level) -> Self {
        Self {
            queue,
            source,
            level,
            buffer: Vec::new(),
        }
    }
}

impl io::Write for LogLineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogLineWriter {
    fn drop(&mut self) {
        let body = String::from_utf8_lossy(&self.buffer);
        let body = body.trim();
        if body.is_empty() {
            return;
        }

        let thread = std::thread::current();
        let message = LogMessage {
            source: std::mem::take(&mut self.source),
            body: body.to_string(),
            level: self.level.to_string(),
            thread: thread
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", thread.id())),
            timestamp: Utc::now(),
        };

        // the hub is shutting down when the reader is gone
        let _ = self.queue.enqueue(message);
    }
}
