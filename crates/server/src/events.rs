use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    DeviceDiscovered {
        serial: u16,
        addr: SocketAddr,
    },
    Resynced {
        serial: u16,
        expected: u32,
        got: u32,
    },
    DatagramRejected {
        addr: SocketAddr,
        reason: String,
    },
    Error {
        message: String,
    },
}
