use std::net::SocketAddr;
use std::sync::Arc;

use crate::net::{AckSender, Batch, IngestStats, PacketError, serial_from_addr};
use crate::sink::SinkError;

use super::mote::ProcessOutcome;
use super::registry::SessionRegistry;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed datagram: {0}")]
    Packet(#[from] PacketError),
    #[error("no session for mote {serial:04x}: {source}")]
    Session {
        serial: u16,
        #[source]
        source: SinkError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub serial: u16,
    pub created: bool,
    pub outcome: ProcessOutcome,
}

/// Routes raw datagrams to the session of the mote that sent them.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    acks: AckSender,
    stats: Arc<IngestStats>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>, acks: AckSender, stats: Arc<IngestStats>) -> Self {
        Self {
            registry,
            acks,
            stats,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn handle(&self, data: &[u8], peer: SocketAddr) -> Result<Dispatched, DispatchError> {
        let batch = Batch::parse(data, self.acks.width()).inspect_err(|_| {
            self.stats.record_rejected();
        })?;

        let serial = serial_from_addr(&peer);
        let (session, created) = self
            .registry
            .get_or_create(serial)
            .await
            .map_err(|source| DispatchError::Session { serial, source })?;

        let outcome = session.process(&batch, peer, &self.acks).await;
        Ok(Dispatched {
            serial,
            created,
            outcome,
        })
    }
}
