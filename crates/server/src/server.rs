use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use pecs::{
    DispatchError, Dispatcher, IngestSnapshot, IngestStats, PacketListener, SessionRegistry,
    SessionView, Sinks, SyncDecision,
};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use crate::events::ServerEvent;

#[derive(Debug, Clone, Copy)]
pub struct ServerStats {
    pub uptime_secs: u64,
    pub motes: usize,
    pub ingest: IngestSnapshot,
}

pub struct IngestServer {
    listener: PacketListener,
    dispatcher: Dispatcher,
    stats: Arc<IngestStats>,
    in_flight: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ServerEvent>,
    start_time: Instant,
}

impl IngestServer {
    pub async fn bind(
        config: ServerConfig,
        sinks: Sinks,
    ) -> io::Result<(Self, mpsc::UnboundedReceiver<ServerEvent>)> {
        let stats = Arc::new(IngestStats::default());
        let listener = PacketListener::bind(config.bind, Arc::clone(&stats)).await?;
        let acks = listener.ack_sender(config.session.header_width, config.ack_timestamp);

        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let registry = Arc::new(SessionRegistry::new(
            config.session,
            sinks,
            Arc::clone(&stats),
            tracker.clone(),
            cancel.clone(),
        ));
        let dispatcher = Dispatcher::new(registry, acks, Arc::clone(&stats));
        let (events, events_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                listener,
                dispatcher,
                stats,
                in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
                tracker,
                cancel,
                events,
                start_time: Instant::now(),
            },
            events_rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serves until cancelled, then waits for in-flight datagrams and the
    /// per-session publishers to finish.
    pub async fn run(&self) {
        let dispatcher = self.dispatcher.clone();
        let events = self.events.clone();

        self.listener
            .run(
                Arc::clone(&self.in_flight),
                &self.tracker,
                &self.cancel,
                move |data, peer| {
                    let dispatcher = dispatcher.clone();
                    let events = events.clone();
                    async move { handle_datagram(&dispatcher, &events, &data, peer).await }
                },
            )
            .await;

        self.tracker.close();
        self.tracker.wait().await;
        log::info!(
            "Drained {} sessions after {} datagrams",
            self.dispatcher.registry().len(),
            self.stats.snapshot().datagrams_received
        );
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            uptime_secs: self.start_time.elapsed().as_secs(),
            motes: self.dispatcher.registry().len(),
            ingest: self.stats.snapshot(),
        }
    }

    pub fn views(&self) -> Vec<SessionView> {
        self.dispatcher.registry().views()
    }
}

async fn handle_datagram(
    dispatcher: &Dispatcher,
    events: &mpsc::UnboundedSender<ServerEvent>,
    data: &[u8],
    peer: SocketAddr,
) {
    // The receiver is gone in headless mode.
    let event = match dispatcher.handle(data, peer).await {
        Ok(dispatched) => {
            if dispatched.created {
                let _ = events.send(ServerEvent::DeviceDiscovered {
                    serial: dispatched.serial,
                    addr: peer,
                });
            }
            match dispatched.outcome.decision {
                SyncDecision::Desync { expected } => ServerEvent::Resynced {
                    serial: dispatched.serial,
                    expected,
                    got: dispatched.outcome.read_ptr,
                },
                _ => return,
            }
        }
        Err(DispatchError::Packet(e)) => {
            log::warn!("Dropping datagram from {}: {}", peer, e);
            ServerEvent::DatagramRejected {
                addr: peer,
                reason: e.to_string(),
            }
        }
        Err(e) => {
            log::error!("{}", e);
            ServerEvent::Error {
                message: e.to_string(),
            }
        }
    };
    let _ = events.send(event);
}
