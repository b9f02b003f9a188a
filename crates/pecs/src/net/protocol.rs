use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 4040;
pub const MAX_DATAGRAM_SIZE: usize = 2048;
pub const RECORDS_PER_BATCH: usize = 16;
pub const RECORD_LEN: usize = 4;
pub const DEFAULT_LOG_SIZE: u32 = 0x1e0000;

/// Width of the little-endian read pointer that prefixes every batch and ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderWidth {
    Two,
    #[default]
    Three,
}

impl HeaderWidth {
    pub fn byte_len(self) -> usize {
        match self {
            HeaderWidth::Two => 2,
            HeaderWidth::Three => 3,
        }
    }

    /// Log size used when a deployment does not configure one. A two byte
    /// pointer cannot address the full flash log, so it wraps at 16 bits.
    pub fn default_log_size(self) -> u32 {
        match self {
            HeaderWidth::Two => 0x10000,
            HeaderWidth::Three => DEFAULT_LOG_SIZE,
        }
    }

    fn read_pointer(self, bytes: &[u8]) -> u32 {
        bytes[..self.byte_len()]
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32)
    }

    fn write_pointer(self, pointer: u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&pointer.to_le_bytes()[..self.byte_len()]);
    }
}

impl FromStr for HeaderWidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2" => Ok(HeaderWidth::Two),
            "3" => Ok(HeaderWidth::Three),
            other => Err(format!("unsupported header width '{other}', expected 2 or 3")),
        }
    }
}

impl fmt::Display for HeaderWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.byte_len())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("datagram filled the {limit} byte receive buffer and may be truncated")]
    Oversized { limit: usize },
}

pub type RawRecord = [u8; RECORD_LEN];

/// One device datagram: the log read pointer and the fixed batch of records
/// that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub read_ptr: u32,
    pub records: [RawRecord; RECORDS_PER_BATCH],
}

impl Batch {
    pub fn new(read_ptr: u32, records: [RawRecord; RECORDS_PER_BATCH]) -> Self {
        Self { read_ptr, records }
    }

    pub fn encoded_len(width: HeaderWidth) -> usize {
        width.byte_len() + RECORDS_PER_BATCH * RECORD_LEN
    }

    /// Trailing bytes past the last record are ignored; devices pad some frames.
    /// The pointer is taken as the device reports it, even past the end of the
    /// log; the session resyncs onto it.
    pub fn parse(data: &[u8], width: HeaderWidth) -> Result<Self, PacketError> {
        let expected = Self::encoded_len(width);
        if data.len() < expected {
            return Err(PacketError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        let read_ptr = width.read_pointer(data);
        let mut records = [[0u8; RECORD_LEN]; RECORDS_PER_BATCH];
        let body = &data[width.byte_len()..expected];
        for (record, chunk) in records.iter_mut().zip(body.chunks_exact(RECORD_LEN)) {
            record.copy_from_slice(chunk);
        }

        Ok(Self { read_ptr, records })
    }

    pub fn encode(&self, width: HeaderWidth) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::encoded_len(width));
        width.write_pointer(self.read_ptr, &mut out);
        for record in &self.records {
            out.extend_from_slice(record);
        }
        out
    }
}

/// Release packet telling a mote it may reclaim its log up to `read_ptr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub read_ptr: u32,
    pub observer_secs: Option<u32>,
}

impl Ack {
    pub fn new(read_ptr: u32, observer_secs: Option<u32>) -> Self {
        Self {
            read_ptr,
            observer_secs,
        }
    }

    pub fn encode(&self, width: HeaderWidth) -> Vec<u8> {
        let mut out = Vec::with_capacity(width.byte_len() + 4);
        width.write_pointer(self.read_ptr, &mut out);
        if let Some(secs) = self.observer_secs {
            out.extend_from_slice(&secs.to_le_bytes());
        }
        out
    }
}

/// Motes are addressed by serial: the low 16 bits of their source address.
pub fn serial_from_addr(addr: &SocketAddr) -> u16 {
    match addr.ip() {
        IpAddr::V6(ip) => {
            let octets = ip.octets();
            u16::from_be_bytes([octets[14], octets[15]])
        }
        IpAddr::V4(ip) => {
            let octets = ip.octets();
            u16::from_be_bytes([octets[2], octets[3]])
        }
    }
}
