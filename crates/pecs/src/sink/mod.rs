mod archiver;
mod error;
mod journal;
mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::record::{Boot, Stream};

pub use archiver::{
    ArchiverPublisher, DEFAULT_INGEST_URL, DEFAULT_QUERY_URL, ingest_document, stream_query,
};
pub use error::SinkError;
pub use journal::JournalStore;
pub use retry::RetryPolicy;

/// Time-series archiver that owns the per-mote streams.
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    /// Returns the identifier of `/<serial>/<stream>`, minting one if the
    /// archiver has never seen the stream.
    async fn resolve_stream_id(&self, serial: u16, stream: Stream) -> Result<String, SinkError>;

    async fn publish(
        &self,
        stream_id: &str,
        path: &str,
        unit: &str,
        timestamp_ms: u64,
        value: f64,
    ) -> Result<(), SinkError>;
}

/// Durable store for boot/reset events.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn record_boot(&self, row: &BootRow) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootRow {
    pub serial: String,
    pub resets: u8,
    pub religion: String,
    pub version: u8,
    /// Device wall time in Unix milliseconds, zero when the mote had no time.
    pub nodetime: u64,
}

impl BootRow {
    pub fn new(serial: u16, boot: &Boot, node_time_ms: Option<u64>) -> Self {
        Self {
            serial: format!("{:#06x}", serial),
            resets: boot.resets,
            religion: format!("{:#x}", boot.external_image_id()),
            version: boot.version,
            nodetime: node_time_ms.unwrap_or(0),
        }
    }
}
