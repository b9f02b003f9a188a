use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::net::{AckSender, Batch, DEFAULT_LOG_SIZE, HeaderWidth, IngestStats, RawRecord};
use crate::record::{
    BatteryLayout, Boot, Decoded, DeviceClock, Reading, Record, Stream, interpret,
    observer_millis,
};
use crate::sink::{BootRow, EventStore, RetryPolicy, SinkError, TelemetryPublisher};

use super::resync::{ResyncController, SyncDecision};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub header_width: HeaderWidth,
    pub log_size: u32,
    pub battery_layout: BatteryLayout,
    pub metrics_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            header_width: HeaderWidth::Three,
            log_size: DEFAULT_LOG_SIZE,
            battery_layout: BatteryLayout::ThreeBit,
            metrics_interval: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct Sinks {
    pub telemetry: Arc<dyn TelemetryPublisher>,
    pub events: Arc<dyn EventStore>,
}

impl Sinks {
    pub fn new(telemetry: Arc<dyn TelemetryPublisher>, events: Arc<dyn EventStore>) -> Self {
        Self { telemetry, events }
    }
}

/// Read-only picture of a session, refreshed after every datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub serial: u16,
    pub read_ptr: Option<u32>,
    pub clock: DeviceClock,
    pub corrupt_records: u64,
    pub datagrams: u64,
    pub duplicates: u64,
    pub resyncs: u64,
    pub last_peer: Option<SocketAddr>,
    pub last_seen: Option<Instant>,
}

impl SessionView {
    fn new(serial: u16) -> Self {
        Self {
            serial,
            read_ptr: None,
            clock: DeviceClock::new(),
            corrupt_records: 0,
            datagrams: 0,
            duplicates: 0,
            resyncs: 0,
            last_peer: None,
            last_seen: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub decision: SyncDecision,
    pub read_ptr: u32,
    pub ack_sent: bool,
}

struct SessionState {
    sync: ResyncController,
    corrupt_records: u64,
    datagrams: u64,
    duplicates: u64,
    resyncs: u64,
}

/// One mote's ingestion state. Datagrams for the same mote are handled one at
/// a time under `state`.
pub struct Session {
    serial: u16,
    streams: HashMap<Stream, String>,
    state: Mutex<SessionState>,
    view: watch::Sender<SessionView>,
    sinks: Sinks,
    config: Arc<SessionConfig>,
    stats: Arc<IngestStats>,
}

impl Session {
    /// Resolves every stream identifier up front; the session is unusable
    /// until the archiver has answered for all of them.
    pub async fn create(
        serial: u16,
        config: Arc<SessionConfig>,
        sinks: Sinks,
        stats: Arc<IngestStats>,
    ) -> Result<Self, SinkError> {
        let mut streams = HashMap::with_capacity(Stream::ALL.len());
        for stream in Stream::ALL {
            let what = format!("resolving {}", stream.path(serial));
            let id = config
                .retry
                .run(&what, || sinks.telemetry.resolve_stream_id(serial, stream))
                .await?;
            streams.insert(stream, id);
        }

        let (view, _) = watch::channel(SessionView::new(serial));

        Ok(Self {
            serial,
            streams,
            state: Mutex::new(SessionState {
                sync: ResyncController::new(config.log_size),
                corrupt_records: 0,
                datagrams: 0,
                duplicates: 0,
                resyncs: 0,
            }),
            view,
            sinks,
            config,
            stats,
        })
    }

    pub fn serial(&self) -> u16 {
        self.serial
    }

    pub fn stream_id(&self, stream: Stream) -> Option<&str> {
        self.streams.get(&stream).map(String::as_str)
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    pub async fn process(&self, batch: &Batch, peer: SocketAddr, acks: &AckSender) -> ProcessOutcome {
        let mut state = self.state.lock().await;

        self.publish(Reading::new(
            Stream::LogPtr,
            observer_millis(),
            batch.read_ptr as f64,
        ))
        .await;

        if batch.read_ptr >= self.config.log_size {
            log::warn!(
                "{:04x}: read pointer {:#x} lies past the {:#x} byte log, following it anyway",
                self.serial,
                batch.read_ptr,
                self.config.log_size
            );
        }

        let decision = state.sync.observe(batch.read_ptr);
        state.datagrams += 1;
        match decision {
            SyncDecision::Initial => {
                log::info!("{:04x}: synchronised at {:#x}", self.serial, batch.read_ptr);
            }
            SyncDecision::Advance => {}
            SyncDecision::Duplicate => {
                state.duplicates += 1;
                self.stats.record_duplicate();
                log::debug!(
                    "{:04x}: duplicate batch {:#x}, releasing again",
                    self.serial,
                    batch.read_ptr
                );
            }
            SyncDecision::Desync { expected } => {
                state.resyncs += 1;
                self.stats.record_desync();
                log::warn!(
                    "{:04x}: lost mote sync. Expected {:#x}, got {:#x}",
                    self.serial,
                    expected,
                    batch.read_ptr
                );
            }
        }

        if decision.should_process() {
            for raw in batch.records {
                self.handle_record(&mut state, raw).await;
            }
        }

        let ack_sent = match acks.send(peer, batch.read_ptr).await {
            Ok(_) => true,
            Err(e) => {
                log::error!("{:04x}: failed to release {:#x}: {}", self.serial, batch.read_ptr, e);
                false
            }
        };

        self.refresh_view(&state, peer);

        ProcessOutcome {
            decision,
            read_ptr: batch.read_ptr,
            ack_sent,
        }
    }

    async fn handle_record(&self, state: &mut SessionState, raw: RawRecord) {
        let record = Record::decode(raw, self.config.battery_layout);
        self.stats.record_decoded();

        match interpret(&record, state.sync.clock_mut()) {
            Decoded::Corrupt => {
                state.corrupt_records += 1;
                self.stats.record_corrupt();
                if record == Record::Blank {
                    log::debug!("{:04x}: skipping blank record {:02x?}", self.serial, raw);
                } else {
                    log::warn!("{:04x}: unrecognised record {:02x?}", self.serial, raw);
                }
            }
            Decoded::Dropped => {
                self.stats.record_dropped_no_time();
                log::debug!(
                    "{:04x}: dropping {} record, no absolute time",
                    self.serial,
                    record.kind().as_str()
                );
            }
            Decoded::Timed { at_ms } => {
                self.publish_all(record.readings(at_ms, observer_millis()))
                    .await;
            }
            Decoded::Boot { at_ms } => {
                if let Record::Boot(boot) = &record {
                    self.persist_boot(boot, at_ms).await;
                }
                match at_ms {
                    Some(at_ms) => {
                        self.publish_all(record.readings(at_ms, observer_millis()))
                            .await
                    }
                    None => log::debug!("{:04x}: boot readings held back, no time", self.serial),
                }
            }
        }
    }

    async fn persist_boot(&self, boot: &Boot, at_ms: Option<u64>) {
        let row = BootRow::new(self.serial, boot, at_ms);
        let what = format!("recording boot of {:04x}", self.serial);
        let result = self
            .config
            .retry
            .run(&what, || self.sinks.events.record_boot(&row))
            .await;

        match result {
            Ok(()) => log::info!(
                "{:04x}: boot v{} after {} resets, image {}",
                self.serial,
                row.version,
                row.resets,
                row.religion
            ),
            Err(e) => {
                self.stats.record_sink_failure();
                log::warn!("{:04x}: boot row lost: {}", self.serial, e);
            }
        }
    }

    async fn publish_all(&self, readings: Vec<Reading>) {
        for reading in readings {
            self.publish(reading).await;
        }
    }

    async fn publish(&self, reading: Reading) {
        let path = reading.stream.path(self.serial);
        let Some(stream_id) = self.stream_id(reading.stream) else {
            log::warn!("Dropped {} reading: stream was never resolved", path);
            return;
        };
        let result = self
            .config
            .retry
            .run(&path, || {
                self.sinks.telemetry.publish(
                    stream_id,
                    &path,
                    reading.stream.unit(),
                    reading.timestamp_ms,
                    reading.value,
                )
            })
            .await;

        if let Err(e) = result {
            self.stats.record_sink_failure();
            log::warn!("Dropped {} reading: {}", path, e);
        }
    }

    fn refresh_view(&self, state: &SessionState, peer: SocketAddr) {
        self.view.send_modify(|view| {
            view.read_ptr = state.sync.read_ptr();
            view.clock = *state.sync.clock();
            view.corrupt_records = state.corrupt_records;
            view.datagrams = state.datagrams;
            view.duplicates = state.duplicates;
            view.resyncs = state.resyncs;
            view.last_peer = Some(peer);
            view.last_seen = Some(Instant::now());
        });
    }

    /// Periodic health readings: corrupt record count, and once the mote has
    /// ever reported a time, its clock as seen from here.
    pub async fn publish_metrics(&self) {
        let view = self.view();
        let now_ms = observer_millis();

        if let Some(device_ms) = view.clock.last_wall_millis() {
            self.publish(Reading::new(
                Stream::RemoteInWallTime,
                now_ms,
                (device_ms / 1000) as f64,
            ))
            .await;
            let offset_secs = (device_ms as f64 - now_ms as f64) / 1000.0;
            self.publish(Reading::new(Stream::Offset, now_ms, offset_secs))
                .await;
        }

        self.publish(Reading::new(
            Stream::SessionCorruptRecords,
            now_ms,
            view.corrupt_records as f64,
        ))
        .await;
    }

    pub fn spawn_metrics(self: &Arc<Self>, tracker: &TaskTracker, cancel: CancellationToken) {
        let session = Arc::clone(self);
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(session.config.metrics_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => session.publish_metrics().await,
                }
            }
            log::debug!("{:04x}: metrics publisher stopped", session.serial);
        });
    }
}
