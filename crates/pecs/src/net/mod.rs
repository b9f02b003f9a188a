mod endpoint;
mod protocol;
mod stats;

pub use endpoint::{AckSender, PacketListener};
pub use protocol::{
    Ack, Batch, DEFAULT_LOG_SIZE, DEFAULT_PORT, HeaderWidth, MAX_DATAGRAM_SIZE, PacketError,
    RECORD_LEN, RECORDS_PER_BATCH, RawRecord, serial_from_addr,
};
pub use stats::{IngestSnapshot, IngestStats};
