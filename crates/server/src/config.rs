use std::net::{Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use pecs::sink::{DEFAULT_INGEST_URL, DEFAULT_QUERY_URL};
use pecs::{DEFAULT_PORT, SessionConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub session: SessionConfig,
    /// Append the observer's Unix seconds to every release packet.
    pub ack_timestamp: bool,
    pub max_in_flight: usize,
    pub query_url: String,
    pub ingest_url: String,
    pub journal_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_PORT)),
            session: SessionConfig::default(),
            ack_timestamp: true,
            max_in_flight: 256,
            query_url: DEFAULT_QUERY_URL.to_string(),
            ingest_url: DEFAULT_INGEST_URL.to_string(),
            journal_path: PathBuf::from("pecs-boots.jsonl"),
        }
    }
}
