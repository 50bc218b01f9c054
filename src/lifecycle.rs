use crate::config::BotConfig;
use crate::error::TransportError;
use crate::http::{frame_json, HttpResponse, ResponseReader};
use crate::slot::Command;
use crate::transport::{ByteConnection, ConnectionState, Endpoint};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Link state readable without holding the connection.
///
/// The caller side consults this for submissions and the watchdog while an
/// exchange may be holding the connection itself.
#[derive(Debug)]
pub struct LinkStatus {
    state: AtomicU8,
    /// `None` is the sentinel that makes the watchdog fire immediately.
    last_response: Mutex<Option<Instant>>,
}

impl LinkStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            last_response: Mutex::new(Some(Instant::now())),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let raw = match state {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        };
        self.state.store(raw, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn touch(&self, now: Instant) {
        *self.last_response.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);
    }

    /// Force a reset on the next watchdog check.
    pub fn expire(&self) {
        *self.last_response.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn last_response(&self) -> Option<Instant> {
        *self.last_response.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True when nothing was heard for longer than `limit`, or the link was
    /// explicitly expired.
    pub fn is_stale(&self, now: Instant, limit: Duration) -> bool {
        match self.last_response() {
            None => true,
            Some(at) => now.saturating_duration_since(at) > limit,
        }
    }
}

/// Owns the byte connection and decides when it is (re)opened.
pub struct ConnectionLifecycle {
    conn: Box<dyn ByteConnection>,
    endpoints: Vec<Endpoint>,
    host: String,
    token: String,
    reader: ResponseReader,
    status: Arc<LinkStatus>,
}

impl ConnectionLifecycle {
    pub fn new(conn: Box<dyn ByteConnection>, config: &BotConfig) -> Self {
        Self {
            conn,
            endpoints: config.endpoints(),
            host: config.host.clone(),
            token: config.token.clone(),
            reader: ResponseReader::new(config.max_payload_bytes),
            status: Arc::new(LinkStatus::new()),
        }
    }

    pub fn status(&self) -> Arc<LinkStatus> {
        self.status.clone()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected() && self.conn.connected()
    }

    /// Open the link if needed, trying each endpoint in order.
    pub async fn connect(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        self.status.set_state(ConnectionState::Connecting);

        for endpoint in &self.endpoints {
            match self.conn.connect(endpoint).await {
                Ok(()) => {
                    tracing::info!("Connected to Telegram server at {endpoint}");
                    self.status.set_state(ConnectionState::Connected);
                    return true;
                }
                Err(e) => tracing::warn!("Telegram connect via {endpoint} failed: {e}"),
            }
        }

        tracing::error!("Unable to connect to Telegram server");
        self.status.set_state(ConnectionState::Disconnected);
        false
    }

    /// Close, forget buffered bytes, restart the watchdog and reconnect.
    pub async fn reset(&mut self) -> bool {
        tracing::info!("Resetting Telegram connection");
        self.conn.close().await;
        self.reader.clear();
        self.status.set_state(ConnectionState::Disconnected);
        self.status.touch(Instant::now());
        self.connect().await
    }

    /// Mark the link dead after a failed or interrupted exchange.
    pub fn abandon(&mut self, reason: &TransportError) {
        tracing::warn!("Telegram exchange abandoned: {reason}");
        self.reader.clear();
        self.status.expire();
        self.status.set_state(ConnectionState::Disconnected);
    }

    /// One JSON request/response round trip.
    pub async fn exchange(&mut self, command: &Command) -> Result<HttpResponse, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let request = frame_json(&self.host, &self.token, &command.operation, &command.body);
        let result = match self.conn.write_all(&request).await {
            Ok(()) => self.reader.read_response(&mut *self.conn).await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    /// Write raw bytes, e.g. the parts of a multipart upload.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if let Err(e) = self.conn.write_all(bytes).await {
            self.abandon(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Read the response to something written with [`Self::send_raw`].
    pub async fn receive(&mut self) -> Result<HttpResponse, TransportError> {
        let result = self.reader.read_response(&mut *self.conn).await;
        self.settle(result)
    }

    fn settle(
        &mut self,
        result: Result<HttpResponse, TransportError>,
    ) -> Result<HttpResponse, TransportError> {
        match result {
            Ok(response) => {
                self.status.touch(Instant::now());
                if response.close {
                    tracing::debug!("Connection closed from server side");
                    self.status.expire();
                    self.status.set_state(ConnectionState::Disconnected);
                }
                Ok(response)
            }
            Err(e) => {
                self.abandon(&e);
                Err(e)
            }
        }
    }
}
