use crate::format::Record;
use async_trait::async_trait;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Downstream consumer of formatted records.
///
/// Delivery failures are handled inside the sink; the poller never sees them.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn emit(&self, record: Record);
}

/// Forwards records into a bounded channel. A full channel makes `emit` wait.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Record>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end of its channel.
    pub fn channel(buffer_size: usize) -> (Self, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn emit(&self, record: Record) {
        if let Err(e) = self.tx.send(record).await {
            warn!(tag = %e.0.tag, "Record receiver closed, dropping record");
        }
    }
}

/// Writes each record to stdout as one JSON line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

#[async_trait]
impl RecordSink for StdoutSink {
    async fn emit(&self, record: Record) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                error!(tag = %record.tag, error = %e, "Failed to serialize record");
                return;
            }
        };

        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{}", line) {
            error!(error = %e, "Failed to write record to stdout");
        }
    }
}
