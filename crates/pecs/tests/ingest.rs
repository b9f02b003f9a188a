use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pecs::record::{device_to_wall_millis, observer_millis};
use pecs::{
    BootRow, Dispatcher, EventStore, HeaderWidth, IngestStats, PacketListener, RECORDS_PER_BATCH,
    RawRecord, RetryPolicy, SessionConfig, SessionRegistry, SinkError, Sinks, Stream,
    SyncDecision, TelemetryPublisher,
};
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const TIMESTAMP_1000: RawRecord = [0xe0, 0x00, 0x03, 0xe8];
const THO: RawRecord = [0x1c, 0x12, 0x34, 0x56];
const BOOT: RawRecord = [0xd3, 0x0a, 0xbc, 0xde];
const UNKNOWN: RawRecord = [0x80, 0x00, 0x00, 0x00];
const IDLE: RawRecord = [0x00, 0x00, 0x00, 0x00];

#[derive(Debug, Clone, PartialEq)]
struct Published {
    path: String,
    timestamp_ms: u64,
    value: f64,
}

#[derive(Default)]
struct FakePublisher {
    published: Mutex<Vec<Published>>,
    failing: AtomicBool,
}

impl FakePublisher {
    fn on(&self, stream: Stream) -> Vec<Published> {
        let suffix = format!("/{}", stream.name());
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.path.ends_with(&suffix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TelemetryPublisher for FakePublisher {
    async fn resolve_stream_id(&self, serial: u16, stream: Stream) -> Result<String, SinkError> {
        Ok(format!("{:04x}-{}", serial, stream))
    }

    async fn publish(
        &self,
        _stream_id: &str,
        path: &str,
        _unit: &str,
        timestamp_ms: u64,
        value: f64,
    ) -> Result<(), SinkError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(SinkError::Status {
                url: "fake".to_string(),
                status: 503,
                body: String::new(),
            });
        }
        self.published.lock().unwrap().push(Published {
            path: path.to_string(),
            timestamp_ms,
            value,
        });
        Ok(())
    }
}

#[derive(Default)]
struct FakeStore {
    rows: Mutex<Vec<BootRow>>,
}

#[async_trait]
impl EventStore for FakeStore {
    async fn record_boot(&self, row: &BootRow) -> Result<(), SinkError> {
        self.rows.lock().unwrap().push(row.clone());
        Ok(())
    }
}

struct Harness {
    dispatcher: Dispatcher,
    listener: PacketListener,
    mote: UdpSocket,
    publisher: Arc<FakePublisher>,
    store: Arc<FakeStore>,
    stats: Arc<IngestStats>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn quiet_config() -> SessionConfig {
    SessionConfig {
        metrics_interval: Duration::from_secs(3600),
        retry: RetryPolicy::none(),
        ..SessionConfig::default()
    }
}

async fn harness(config: SessionConfig, ack_timestamp: bool) -> Harness {
    let stats = Arc::new(IngestStats::default());
    let listener = PacketListener::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&stats))
        .await
        .unwrap();
    let acks = listener.ack_sender(config.header_width, ack_timestamp);

    let publisher = Arc::new(FakePublisher::default());
    let store = Arc::new(FakeStore::default());
    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();

    let registry = Arc::new(SessionRegistry::new(
        config,
        Sinks::new(publisher.clone(), store.clone()),
        Arc::clone(&stats),
        tracker.clone(),
        cancel.clone(),
    ));
    let dispatcher = Dispatcher::new(registry, acks, Arc::clone(&stats));
    let mote = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    Harness {
        dispatcher,
        listener,
        mote,
        publisher,
        store,
        stats,
        tracker,
        cancel,
    }
}

fn datagram(width: HeaderWidth, read_ptr: u32, leading: &[RawRecord]) -> Vec<u8> {
    let mut records = [IDLE; RECORDS_PER_BATCH];
    records[..leading.len()].copy_from_slice(leading);
    pecs::Batch::new(read_ptr, records).encode(width)
}

async fn recv_ack(mote: &UdpSocket) -> Option<Vec<u8>> {
    let mut buf = [0u8; 64];
    let received = tokio::time::timeout(Duration::from_millis(500), mote.recv_from(&mut buf)).await;
    match received {
        Ok(Ok((size, _))) => Some(buf[..size].to_vec()),
        _ => None,
    }
}

impl Harness {
    fn mote_addr(&self) -> SocketAddr {
        self.mote.local_addr().unwrap()
    }

    async fn send(&self, read_ptr: u32, leading: &[RawRecord]) -> SyncDecision {
        let data = datagram(self.dispatcher_width(), read_ptr, leading);
        let dispatched = self
            .dispatcher
            .handle(&data, self.mote_addr())
            .await
            .unwrap();
        assert!(dispatched.outcome.ack_sent);
        dispatched.outcome.decision
    }

    fn dispatcher_width(&self) -> HeaderWidth {
        self.dispatcher.registry().config().header_width
    }

    fn view(&self) -> pecs::SessionView {
        self.dispatcher.registry().get(0x0001).unwrap().view()
    }
}

#[tokio::test]
async fn test_advancing_batches_are_decoded_once() {
    let h = harness(quiet_config(), true).await;

    assert_eq!(h.send(0x100, &[TIMESTAMP_1000, THO]).await, SyncDecision::Initial);
    let ack = recv_ack(&h.mote).await.unwrap();
    assert_eq!(ack.len(), 7);
    assert_eq!(&ack[..3], &[0x00, 0x01, 0x00]);

    assert_eq!(h.send(0x100, &[TIMESTAMP_1000, THO]).await, SyncDecision::Duplicate);
    let ack = recv_ack(&h.mote).await.unwrap();
    assert_eq!(&ack[..3], &[0x00, 0x01, 0x00]);
    assert_eq!(h.publisher.on(Stream::Temperature).len(), 1);

    assert_eq!(h.send(0x110, &[THO]).await, SyncDecision::Advance);
    recv_ack(&h.mote).await.unwrap();

    let temperatures = h.publisher.on(Stream::Temperature);
    assert_eq!(temperatures.len(), 2);
    assert_eq!(temperatures[0].timestamp_ms, device_to_wall_millis(1003));
    assert_eq!(temperatures[1].timestamp_ms, device_to_wall_millis(1006));

    let view = h.view();
    assert_eq!(view.read_ptr, Some(0x110));
    assert_eq!(view.datagrams, 3);
    assert_eq!(view.duplicates, 1);
    assert_eq!(h.stats.snapshot().duplicates, 1);
    assert_eq!(h.publisher.on(Stream::LogPtr).len(), 3);
}

#[tokio::test]
async fn test_desync_drops_time_until_next_timestamp() {
    let h = harness(quiet_config(), true).await;

    h.send(0x100, &[TIMESTAMP_1000]).await;
    assert_eq!(
        h.send(0x500, &[THO]).await,
        SyncDecision::Desync { expected: 0x110 }
    );

    assert!(h.publisher.on(Stream::Temperature).is_empty());
    let view = h.view();
    assert_eq!(view.read_ptr, Some(0x500));
    assert!(!view.clock.has_absolute_time());
    assert!(view.clock.has_ever_had_time());
    assert_eq!(view.resyncs, 1);

    let snapshot = h.stats.snapshot();
    assert_eq!(snapshot.desyncs, 1);
    assert!(snapshot.dropped_no_time >= 1);

    h.send(0x510, &[TIMESTAMP_1000, THO]).await;
    assert_eq!(h.publisher.on(Stream::Temperature).len(), 1);
}

#[tokio::test]
async fn test_boot_is_stored_without_time_but_not_published() {
    let h = harness(quiet_config(), false).await;

    h.send(0x00, &[BOOT]).await;
    {
        let rows = h.store.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].serial, "0x0001");
        assert_eq!(rows[0].religion, "0x7bcde");
        assert_eq!(rows[0].nodetime, 0);
    }
    assert!(h.publisher.on(Stream::Resets).is_empty());

    h.send(0x10, &[TIMESTAMP_1000, BOOT]).await;
    let rows = h.store.rows.lock().unwrap().clone();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].nodetime, device_to_wall_millis(1000));

    let resets = h.publisher.on(Stream::Resets);
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].value, 2.0);
    assert_eq!(h.publisher.on(Stream::FwVersion)[0].value, 3.0);
}

#[tokio::test]
async fn test_unknown_record_counts_as_corrupt() {
    let h = harness(quiet_config(), true).await;

    h.send(0x20, &[TIMESTAMP_1000]).await;
    assert_eq!(h.send(0x30, &[UNKNOWN]).await, SyncDecision::Advance);

    let view = h.view();
    assert_eq!(view.corrupt_records, 1);
    assert_eq!(view.read_ptr, Some(0x30));
    assert_eq!(view.clock.current(), 1000);
    assert!(view.clock.has_absolute_time());
    assert_eq!(h.stats.snapshot().corrupt_records, 1);
}

#[tokio::test]
async fn test_two_byte_header_acks() {
    let config = SessionConfig {
        header_width: HeaderWidth::Two,
        log_size: HeaderWidth::Two.default_log_size(),
        ..quiet_config()
    };
    let h = harness(config, false).await;

    h.send(0xfff0, &[TIMESTAMP_1000]).await;
    assert_eq!(recv_ack(&h.mote).await.unwrap(), vec![0xf0, 0xff]);

    assert_eq!(h.send(0x0000, &[THO]).await, SyncDecision::Advance);
    assert_eq!(recv_ack(&h.mote).await.unwrap(), vec![0x00, 0x00]);
}

#[tokio::test]
async fn test_short_datagram_gets_no_ack() {
    let h = harness(quiet_config(), true).await;

    let short = vec![0u8; 10];
    assert!(h.dispatcher.handle(&short, h.mote_addr()).await.is_err());

    assert!(recv_ack(&h.mote).await.is_none());
    assert_eq!(h.stats.snapshot().datagrams_rejected, 1);
    assert!(h.dispatcher.registry().is_empty());
}

#[tokio::test]
async fn test_pointer_past_log_end_is_acked_and_followed() {
    let h = harness(quiet_config(), true).await;

    h.send(0x100, &[TIMESTAMP_1000]).await;
    recv_ack(&h.mote).await.unwrap();

    assert_eq!(
        h.send(0x1f0000, &[THO]).await,
        SyncDecision::Desync { expected: 0x110 }
    );
    let ack = recv_ack(&h.mote).await.unwrap();
    assert_eq!(&ack[..3], &[0x00, 0x00, 0x1f]);

    let view = h.view();
    assert_eq!(view.read_ptr, Some(0x1f0000));
    assert!(!view.clock.has_absolute_time());

    assert_eq!(h.send(0x1f0000, &[THO]).await, SyncDecision::Duplicate);
    assert!(recv_ack(&h.mote).await.is_some());
    assert_eq!(h.stats.snapshot().datagrams_rejected, 0);
}

#[tokio::test]
async fn test_failing_publisher_does_not_stop_ingestion() {
    let h = harness(quiet_config(), true).await;
    h.publisher.failing.store(true, Ordering::Relaxed);

    assert_eq!(h.send(0x40, &[TIMESTAMP_1000, THO]).await, SyncDecision::Initial);
    assert!(recv_ack(&h.mote).await.is_some());

    let view = h.view();
    assert_eq!(view.clock.current(), 1003);
    assert!(h.stats.snapshot().sink_failures > 0);

    h.publisher.failing.store(false, Ordering::Relaxed);
    assert_eq!(h.send(0x50, &[THO]).await, SyncDecision::Advance);
    assert_eq!(h.publisher.on(Stream::Temperature).len(), 1);
}

#[tokio::test]
async fn test_listener_round_trip_and_shutdown() {
    let h = harness(quiet_config(), true).await;
    let server_addr = h.listener.local_addr();

    let in_flight = Arc::new(Semaphore::new(4));
    let dispatcher = h.dispatcher.clone();
    let run = h.listener.run(in_flight, &h.tracker, &h.cancel, move |data, peer| {
        let dispatcher = dispatcher.clone();
        async move {
            let _ = dispatcher.handle(&data, peer).await;
        }
    });

    let mote = async {
        h.mote
            .send_to(&datagram(HeaderWidth::Three, 0x1230, &[TIMESTAMP_1000]), server_addr)
            .await
            .unwrap();
        let ack = recv_ack(&h.mote).await.unwrap();
        assert_eq!(&ack[..3], &[0x30, 0x12, 0x00]);

        h.mote.send_to(&[0u8; 5], server_addr).await.unwrap();
        assert!(recv_ack(&h.mote).await.is_none());

        h.cancel.cancel();
    };

    tokio::join!(run, mote);
    h.tracker.close();
    tokio::time::timeout(Duration::from_secs(2), h.tracker.wait())
        .await
        .unwrap();

    let snapshot = h.stats.snapshot();
    assert_eq!(snapshot.datagrams_received, 2);
    assert_eq!(snapshot.datagrams_rejected, 1);
    assert_eq!(snapshot.acks_sent, 1);
}

#[tokio::test]
async fn test_clock_metrics_follow_time_and_survive_resync() {
    let h = harness(quiet_config(), true).await;

    h.send(0x100, &[]).await;
    let session = h.dispatcher.registry().get(0x0001).unwrap();
    session.publish_metrics().await;

    assert!(h.publisher.on(Stream::Offset).is_empty());
    assert!(h.publisher.on(Stream::RemoteInWallTime).is_empty());
    let corrupt = h.publisher.on(Stream::SessionCorruptRecords);
    assert_eq!(corrupt.last().unwrap().value, 0.0);

    h.send(0x110, &[TIMESTAMP_1000, UNKNOWN]).await;
    session.publish_metrics().await;

    let device_ms = device_to_wall_millis(1000);
    let remote = h.publisher.on(Stream::RemoteInWallTime);
    assert_eq!(remote.last().unwrap().value, (device_ms / 1000) as f64);
    let expected_offset = (device_ms as f64 - observer_millis() as f64) / 1000.0;
    let offset = h.publisher.on(Stream::Offset);
    assert!((offset.last().unwrap().value - expected_offset).abs() < 5.0);
    let corrupt = h.publisher.on(Stream::SessionCorruptRecords);
    assert_eq!(corrupt.last().unwrap().value, 1.0);

    assert_eq!(
        h.send(0x500, &[]).await,
        SyncDecision::Desync { expected: 0x120 }
    );
    assert!(!h.view().clock.has_absolute_time());

    let offsets_before = h.publisher.on(Stream::Offset).len();
    session.publish_metrics().await;
    let offset = h.publisher.on(Stream::Offset);
    assert!(offset.len() > offsets_before);
    assert!((offset.last().unwrap().value - expected_offset).abs() < 5.0);
    let remote = h.publisher.on(Stream::RemoteInWallTime);
    assert_eq!(remote.last().unwrap().value, (device_ms / 1000) as f64);
}

#[tokio::test]
async fn test_metrics_task_publishes_on_its_interval() {
    let config = SessionConfig {
        metrics_interval: Duration::from_millis(20),
        ..quiet_config()
    };
    let h = harness(config, true).await;

    h.send(0x100, &[]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.publisher.on(Stream::SessionCorruptRecords).len() >= 2);
    assert!(h.publisher.on(Stream::Offset).is_empty());

    h.send(0x110, &[TIMESTAMP_1000]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.publisher.on(Stream::Offset).is_empty());
    assert!(!h.publisher.on(Stream::RemoteInWallTime).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resends_are_processed_one_at_a_time() {
    let h = harness(quiet_config(), true).await;

    h.send(0x100, &[TIMESTAMP_1000]).await;
    recv_ack(&h.mote).await.unwrap();

    let next = datagram(HeaderWidth::Three, 0x110, &[THO]);
    let mut handles = JoinSet::new();
    for _ in 0..8 {
        let dispatcher = h.dispatcher.clone();
        let next = next.clone();
        let peer = h.mote_addr();
        handles.spawn(async move { dispatcher.handle(&next, peer).await.unwrap() });
    }

    let mut decisions = Vec::new();
    while let Some(joined) = handles.join_next().await {
        let dispatched = joined.unwrap();
        assert!(dispatched.outcome.ack_sent);
        decisions.push(dispatched.outcome.decision);
    }

    let advances = decisions
        .iter()
        .filter(|d| **d == SyncDecision::Advance)
        .count();
    let duplicates = decisions
        .iter()
        .filter(|d| **d == SyncDecision::Duplicate)
        .count();
    assert_eq!((advances, duplicates), (1, 7));

    assert_eq!(h.publisher.on(Stream::Temperature).len(), 1);
    assert_eq!(h.publisher.on(Stream::LogPtr).len(), 9);
    let view = h.view();
    assert_eq!(view.read_ptr, Some(0x110));
    assert_eq!(view.datagrams, 9);
    assert_eq!(view.duplicates, 7);
    assert_eq!(h.stats.snapshot().acks_sent, 9);
}
