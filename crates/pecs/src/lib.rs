pub mod net;
pub mod record;
pub mod session;
pub mod sink;

pub use net::{
    Ack, AckSender, Batch, DEFAULT_LOG_SIZE, DEFAULT_PORT, HeaderWidth, IngestSnapshot,
    IngestStats, MAX_DATAGRAM_SIZE, PacketError, PacketListener, RECORDS_PER_BATCH, RawRecord,
    serial_from_addr,
};
pub use record::{BatteryLayout, DeviceClock, Reading, Record, RecordKind, Stream};
pub use session::{
    DispatchError, Dispatched, Dispatcher, ProcessOutcome, ResyncController, Session,
    SessionConfig, SessionRegistry, SessionView, Sinks, SyncDecision,
};
pub use sink::{
    ArchiverPublisher, BootRow, EventStore, JournalStore, RetryPolicy, SinkError,
    TelemetryPublisher,
};
