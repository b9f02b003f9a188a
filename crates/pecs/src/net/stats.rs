use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IngestStats {
    datagrams_received: AtomicU64,
    bytes_received: AtomicU64,
    datagrams_rejected: AtomicU64,
    acks_sent: AtomicU64,
    ack_failures: AtomicU64,
    duplicates: AtomicU64,
    desyncs: AtomicU64,
    records_decoded: AtomicU64,
    corrupt_records: AtomicU64,
    dropped_no_time: AtomicU64,
    sink_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSnapshot {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub datagrams_rejected: u64,
    pub acks_sent: u64,
    pub ack_failures: u64,
    pub duplicates: u64,
    pub desyncs: u64,
    pub records_decoded: u64,
    pub corrupt_records: u64,
    pub dropped_no_time: u64,
    pub sink_failures: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl IngestStats {
    pub fn record_datagram(&self, bytes: usize) {
        bump(&self.datagrams_received);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        bump(&self.datagrams_rejected);
    }

    pub fn record_ack(&self, ok: bool) {
        if ok {
            bump(&self.acks_sent);
        } else {
            bump(&self.ack_failures);
        }
    }

    pub fn record_duplicate(&self) {
        bump(&self.duplicates);
    }

    pub fn record_desync(&self) {
        bump(&self.desyncs);
    }

    pub fn record_decoded(&self) {
        bump(&self.records_decoded);
    }

    pub fn record_corrupt(&self) {
        bump(&self.corrupt_records);
    }

    pub fn record_dropped_no_time(&self) {
        bump(&self.dropped_no_time);
    }

    pub fn record_sink_failure(&self) {
        bump(&self.sink_failures);
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_rejected: self.datagrams_rejected.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            desyncs: self.desyncs.load(Ordering::Relaxed),
            records_decoded: self.records_decoded.load(Ordering::Relaxed),
            corrupt_records: self.corrupt_records.load(Ordering::Relaxed),
            dropped_no_time: self.dropped_no_time.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}
