pub mod memory;
pub mod tls;

use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;

pub use memory::{MemoryConnection, MemoryRemote};
pub use tls::{TlsConnection, TlsTrust};

/// Where to open the encrypted stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Resolved through DNS at connect time.
    Host { name: String, port: u16 },
    /// Fixed address, used when DNS is unavailable or disabled.
    Address(SocketAddr),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host { name, port } => write!(f, "{name}:{port}"),
            Self::Address(addr) => write!(f, "{addr}"),
        }
    }
}

/// Link state as seen by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Persistent byte stream to the API host.
///
/// Implementations own the socket and any TLS session. `read` returning
/// `Ok(0)` means the remote finished sending and the stream is unusable.
#[async_trait]
pub trait ByteConnection: Send {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError>;

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn connected(&self) -> bool;

    async fn close(&mut self);
}
