//! Moves commands from the [`CommandSlot`] onto the connection.
//!
//! [`InlineTransmitter`] runs the exchange on the caller's task during
//! `tick`; [`WorkerTransmitter`] keeps a spawned task waiting on the slot.
//! Everything else talks to the [`Transmitter`] trait only.

pub mod inline;
pub mod worker;

pub use inline::InlineTransmitter;
pub use worker::WorkerTransmitter;

use crate::config::Regime;
use crate::error::TransportError;
use crate::http::HttpResponse;
use crate::lifecycle::{ConnectionLifecycle, LinkStatus};
use crate::slot::{Command, CommandSlot, Completion};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Handles shared by the caller side and the transmitter.
#[derive(Clone)]
pub struct SharedLink {
    pub slot: Arc<CommandSlot>,
    /// Held for the whole of an exchange or upload.
    pub lifecycle: Arc<Mutex<ConnectionLifecycle>>,
    pub status: Arc<LinkStatus>,
    /// Longest an exchange may take before the link is abandoned.
    pub deadline: Duration,
}

impl SharedLink {
    pub fn new(lifecycle: ConnectionLifecycle, deadline: Duration) -> Self {
        let status = lifecycle.status();
        Self {
            slot: Arc::new(CommandSlot::new()),
            lifecycle: Arc::new(Mutex::new(lifecycle)),
            status,
            deadline,
        }
    }
}

#[async_trait]
pub trait Transmitter: Send + Sync {
    /// Inline or Worker, never Auto.
    fn regime(&self) -> Regime;

    /// Give the transmitter a chance to move the pending command.
    async fn drain(&self);

    /// Stop any exchange in progress. The slot is left as it was.
    async fn halt(&self);

    /// Bring the exchange cycle back if it stopped.
    fn ensure_running(&self);

    fn is_running(&self) -> bool;
}

/// One exchange bounded by `deadline`; running out of time abandons the link.
pub(crate) async fn exchange_within(
    lifecycle: &mut ConnectionLifecycle,
    command: &Command,
    deadline: Duration,
) -> Result<HttpResponse, TransportError> {
    match tokio::time::timeout(deadline, lifecycle.exchange(command)).await {
        Ok(result) => result,
        Err(_) => {
            let e = TransportError::Timeout(deadline);
            lifecycle.abandon(&e);
            Err(e)
        }
    }
}

/// Run one command and publish the reply.
///
/// The slot is always released, with no completion when the exchange failed.
pub(crate) async fn perform(link: &SharedLink, command: Command) {
    let mut lifecycle = link.lifecycle.lock().await;
    let started = Instant::now();

    let completion = match exchange_within(&mut lifecycle, &command, link.deadline).await {
        Ok(response) => {
            tracing::debug!(
                "Telegram {} -> HTTP {} ({} bytes) in {:?}",
                command.operation,
                response.status,
                response.body.len(),
                started.elapsed()
            );
            Some(Completion {
                operation: command.operation,
                payload: response.body,
            })
        }
        Err(e) => {
            tracing::warn!("Telegram {} failed: {e}", command.operation);
            None
        }
    };
    drop(lifecycle);

    link.slot.complete(completion);
}

/// Build the transmitter for `regime`, resolving `Auto` from the runtime.
pub fn for_regime(
    regime: Regime,
    link: SharedLink,
    budget: Arc<dyn crate::platform::ResourceBudget>,
) -> Box<dyn Transmitter> {
    match resolve(regime) {
        Regime::Worker => Box::new(WorkerTransmitter::new(link, budget)),
        _ => Box::new(InlineTransmitter::new(link)),
    }
}

/// Auto means Worker on a multi-thread runtime and Inline otherwise.
pub fn resolve(regime: Regime) -> Regime {
    match regime {
        Regime::Auto => match tokio::runtime::Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(tokio::runtime::RuntimeFlavor::MultiThread) => Regime::Worker,
            _ => Regime::Inline,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::transport::{MemoryConnection, MemoryRemote};

    pub(crate) async fn connected_link(deadline: Duration) -> (SharedLink, MemoryRemote) {
        let (conn, remote) = MemoryConnection::pair();
        let mut lifecycle = ConnectionLifecycle::new(Box::new(conn), &BotConfig::with_token("1:a"));
        assert!(lifecycle.connect().await);
        (SharedLink::new(lifecycle, deadline), remote)
    }

    #[tokio::test]
    async fn auto_is_inline_on_current_thread() {
        assert_eq!(resolve(Regime::Auto), Regime::Inline);
        assert_eq!(resolve(Regime::Worker), Regime::Worker);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn auto_is_worker_on_multi_thread() {
        assert_eq!(resolve(Regime::Auto), Regime::Worker);
    }

    #[tokio::test]
    async fn perform_publishes_reply_and_frees_slot() {
        let (link, remote) = connected_link(Duration::from_secs(5)).await;
        remote.push_response(r#"{"ok":true,"result":[]}"#);
        assert!(link.slot.try_submit(Command::new("getUpdates", "{}")));

        let command = link.slot.take_pending().unwrap();
        perform(&link, command).await;

        assert!(!link.slot.is_busy());
        let done = link.slot.take_completion().unwrap();
        assert_eq!(done.operation, "getUpdates");
        assert_eq!(done.payload, r#"{"ok":true,"result":[]}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_exchange_times_out_and_expires_link() {
        let (link, _remote) = connected_link(Duration::from_secs(20)).await;
        assert!(link.slot.try_submit(Command::new("getUpdates", "{}")));

        let command = link.slot.take_pending().unwrap();
        perform(&link, command).await;

        assert!(!link.slot.is_busy());
        assert!(!link.slot.has_completion());
        assert!(link.status.last_response().is_none());
        assert!(!link.status.is_connected());
    }
}
