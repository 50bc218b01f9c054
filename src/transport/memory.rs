//! In-process connection with a scriptable remote end.
//!
//! [`MemoryConnection`] is handed to the bot in place of a TLS socket, while
//! the matching [`MemoryRemote`] queues server responses, inspects what was
//! written and simulates unreachable endpoints or a dropped link.

use super::{ByteConnection, Endpoint};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug)]
struct Wire {
    inbound: VecDeque<u8>,
    /// Delivered once the next connect succeeds.
    staged: Vec<u8>,
    outbound: Vec<u8>,
    primary_up: bool,
    fallback_up: bool,
    link_up: bool,
    hangup: bool,
    attempts: Vec<Endpoint>,
    closes: usize,
}

impl Default for Wire {
    fn default() -> Self {
        Self {
            inbound: VecDeque::new(),
            staged: Vec::new(),
            outbound: Vec::new(),
            primary_up: true,
            fallback_up: true,
            link_up: false,
            hangup: false,
            attempts: Vec::new(),
            closes: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    wire: Mutex<Wire>,
    readable: Notify,
}

impl Shared {
    fn wire(&self) -> MutexGuard<'_, Wire> {
        self.wire.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Client half, implements [`ByteConnection`].
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
}

/// Server half, used by tests to script the exchange.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    shared: Arc<Shared>,
}

impl MemoryConnection {
    pub fn pair() -> (MemoryConnection, MemoryRemote) {
        let shared = Arc::new(Shared::default());
        (
            MemoryConnection {
                shared: shared.clone(),
            },
            MemoryRemote { shared },
        )
    }
}

#[async_trait]
impl ByteConnection for MemoryConnection {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let mut wire = self.shared.wire();
        wire.attempts.push(endpoint.clone());
        let reachable = match endpoint {
            Endpoint::Host { .. } => wire.primary_up,
            Endpoint::Address(_) => wire.fallback_up,
        };
        if !reachable {
            return Err(TransportError::Connect {
                target: endpoint.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "unreachable"),
            });
        }
        wire.link_up = true;
        wire.hangup = false;
        let staged = std::mem::take(&mut wire.staged);
        wire.inbound.extend(staged);
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut wire = self.shared.wire();
        if !wire.link_up {
            return Err(TransportError::NotConnected);
        }
        wire.outbound.extend_from_slice(bytes);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            let readable = self.shared.readable.notified();
            {
                let mut wire = self.shared.wire();
                if !wire.inbound.is_empty() {
                    let n = buf.len().min(wire.inbound.len());
                    for (slot, byte) in buf.iter_mut().zip(wire.inbound.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
                if wire.hangup && wire.link_up {
                    wire.link_up = false;
                    return Ok(0);
                }
                if !wire.link_up {
                    return Err(TransportError::Closed);
                }
            }
            readable.await;
        }
    }

    fn connected(&self) -> bool {
        self.shared.wire().link_up
    }

    async fn close(&mut self) {
        let mut wire = self.shared.wire();
        wire.link_up = false;
        wire.closes += 1;
        wire.inbound.clear();
    }
}

impl MemoryRemote {
    /// Queue a `200 OK` response carrying `body` with an exact Content-Length.
    pub fn push_response(&self, body: &str) {
        let framed = format!(
            "HTTP/1.1 200 OK\r\nServer: nginx\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n{body}",
            body.len()
        );
        self.push_raw(framed.as_bytes());
    }

    /// Queue a `200 OK` response that only becomes readable after the
    /// client's next successful connect.
    pub fn push_response_after_reconnect(&self, body: &str) {
        let framed = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        self.shared.wire().staged.extend_from_slice(framed.as_bytes());
    }

    /// Queue raw bytes exactly as given.
    pub fn push_raw(&self, bytes: &[u8]) {
        self.shared.wire().inbound.extend(bytes.iter().copied());
        self.shared.readable.notify_one();
    }

    /// Everything the client wrote so far, without consuming it.
    pub fn written(&self) -> Vec<u8> {
        self.shared.wire().outbound.clone()
    }

    /// Everything the client wrote so far, clearing the capture.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.shared.wire().outbound)
    }

    /// Make the DNS endpoint and/or the fixed address (un)reachable.
    pub fn set_reachable(&self, primary: bool, fallback: bool) {
        let mut wire = self.shared.wire();
        wire.primary_up = primary;
        wire.fallback_up = fallback;
    }

    /// Tear the link down from the remote side; pending reads fail.
    pub fn drop_link(&self) {
        let mut wire = self.shared.wire();
        wire.link_up = false;
        wire.inbound.clear();
        drop(wire);
        self.shared.readable.notify_one();
    }

    /// Let the client read what is queued, then report end of stream.
    pub fn drop_link_after_flush(&self) {
        self.shared.wire().hangup = true;
        self.shared.readable.notify_one();
    }

    pub fn connect_attempts(&self) -> Vec<Endpoint> {
        self.shared.wire().attempts.clone()
    }

    pub fn close_count(&self) -> usize {
        self.shared.wire().closes
    }

    pub fn is_link_up(&self) -> bool {
        self.shared.wire().link_up
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Endpoint {
        Endpoint::Host {
            name: "api.telegram.org".into(),
            port: 443,
        }
    }

    #[tokio::test]
    async fn write_requires_connect() {
        let (mut conn, remote) = MemoryConnection::pair();
        assert!(conn.write_all(b"x").await.is_err());

        conn.connect(&host()).await.unwrap();
        conn.write_all(b"hello").await.unwrap();
        assert_eq!(remote.written(), b"hello");
    }

    #[tokio::test]
    async fn unreachable_primary_fails_connect() {
        let (mut conn, remote) = MemoryConnection::pair();
        remote.set_reachable(false, true);
        assert!(conn.connect(&host()).await.is_err());
        assert!(!conn.connected());

        let addr = Endpoint::Address("149.154.167.220:443".parse().unwrap());
        conn.connect(&addr).await.unwrap();
        assert!(conn.connected());
        assert_eq!(remote.connect_attempts().len(), 2);
    }

    #[tokio::test]
    async fn read_returns_queued_bytes() {
        let (mut conn, remote) = MemoryConnection::pair();
        conn.connect(&host()).await.unwrap();
        remote.push_raw(b"abc");

        let mut buf = [0u8; 2];
        assert_eq!(conn.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(conn.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], b'c');
    }

    #[tokio::test]
    async fn drop_link_wakes_pending_read() {
        let (mut conn, remote) = MemoryConnection::pair();
        conn.connect(&host()).await.unwrap();

        let dropper = remote.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            dropper.drop_link();
        });

        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(!conn.connected());
    }

    #[tokio::test]
    async fn close_counts_and_discards_inbound() {
        let (mut conn, remote) = MemoryConnection::pair();
        conn.connect(&host()).await.unwrap();
        remote.push_raw(b"stale");
        conn.close().await;
        assert_eq!(remote.close_count(), 1);
        assert!(!remote.is_link_up());

        conn.connect(&host()).await.unwrap();
        remote.push_raw(b"new");
        let mut buf = [0u8; 8];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"new");
    }

    #[tokio::test]
    async fn staged_response_arrives_after_reconnect() {
        let (mut conn, remote) = MemoryConnection::pair();
        conn.connect(&host()).await.unwrap();
        remote.push_response_after_reconnect("{}");
        conn.close().await;
        assert!(!remote.is_link_up());

        conn.connect(&host()).await.unwrap();
        let mut buf = [0u8; 256];
        let n = conn.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"HTTP/1.1 200 OK\r\n"));
    }
}
