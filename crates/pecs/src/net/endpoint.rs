use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::protocol::{Ack, HeaderWidth, MAX_DATAGRAM_SIZE, PacketError};
use super::stats::IngestStats;

pub struct PacketListener {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    stats: Arc<IngestStats>,
}

impl PacketListener {
    pub async fn bind(addr: SocketAddr, stats: Arc<IngestStats>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            stats,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn ack_sender(&self, width: HeaderWidth, with_timestamp: bool) -> AckSender {
        AckSender::new(
            Arc::clone(&self.socket),
            width,
            with_timestamp,
            Arc::clone(&self.stats),
        )
    }

    /// Pulls datagrams off the socket until `cancel` fires, handing each one
    /// to `handler` on its own task. At most `in_flight` permits worth of
    /// datagrams are processed at once; beyond that the kernel buffer queues.
    pub async fn run<F, Fut>(
        &self,
        in_flight: Arc<Semaphore>,
        tracker: &TaskTracker,
        cancel: &CancellationToken,
        handler: F,
    ) where
        F: Fn(Vec<u8>, SocketAddr) -> Fut + Send,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&in_flight).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (size, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        log::error!("UDP receive error: {}", e);
                        continue;
                    }
                },
            };

            self.stats.record_datagram(size);

            if size >= buf.len() {
                self.stats.record_rejected();
                log::warn!(
                    "Dropping datagram from {}: {}",
                    peer,
                    PacketError::Oversized { limit: buf.len() }
                );
                continue;
            }

            let work = handler(buf[..size].to_vec(), peer);
            tracker.spawn(async move {
                work.await;
                drop(permit);
            });
        }

        log::info!("Listener on {} stopped", self.local_addr);
    }
}

/// Shared handle for replying to motes. Sends are serialized through one lock
/// so every release packet leaves the socket whole and in order.
#[derive(Clone)]
pub struct AckSender {
    socket: Arc<UdpSocket>,
    send_lock: Arc<Mutex<()>>,
    width: HeaderWidth,
    with_timestamp: bool,
    stats: Arc<IngestStats>,
}

impl AckSender {
    pub fn new(
        socket: Arc<UdpSocket>,
        width: HeaderWidth,
        with_timestamp: bool,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            socket,
            send_lock: Arc::new(Mutex::new(())),
            width,
            with_timestamp,
            stats,
        }
    }

    pub fn width(&self) -> HeaderWidth {
        self.width
    }

    pub fn build(&self, read_ptr: u32) -> Ack {
        let observer_secs = self.with_timestamp.then(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0)
        });
        Ack::new(read_ptr, observer_secs)
    }

    pub async fn send(&self, peer: SocketAddr, read_ptr: u32) -> io::Result<usize> {
        let data = self.build(read_ptr).encode(self.width);

        let _guard = self.send_lock.lock().await;
        let result = self.socket.send_to(&data, peer).await;
        self.stats.record_ack(result.is_ok());
        if result.is_ok() {
            log::debug!("Released {:#x} to {}", read_ptr, peer);
        }
        result
    }
}
