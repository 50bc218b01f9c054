use super::{perform, SharedLink, Transmitter};
use crate::config::Regime;
use crate::platform::ResourceBudget;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Keeps a spawned task that drains the slot as soon as something arrives.
pub struct WorkerTransmitter {
    link: SharedLink,
    budget: Arc<dyn ResourceBudget>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerTransmitter {
    /// The worker is not started until [`Transmitter::ensure_running`].
    pub fn new(link: SharedLink, budget: Arc<dyn ResourceBudget>) -> Self {
        Self {
            link,
            budget,
            handle: Mutex::new(None),
        }
    }
}

async fn run(link: SharedLink, budget: Arc<dyn ResourceBudget>) {
    tracing::debug!("Telegram worker started");
    loop {
        let command = link.slot.next_pending().await;
        if !budget.has_headroom() {
            tracing::error!(
                "Telegram worker out of resources, dropping {} and stopping",
                command.operation
            );
            link.slot.complete(None);
            return;
        }
        perform(&link, command).await;
    }
}

#[async_trait]
impl Transmitter for WorkerTransmitter {
    fn regime(&self) -> Regime {
        Regime::Worker
    }

    async fn drain(&self) {
        tokio::task::yield_now().await;
    }

    async fn halt(&self) {
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            // Wait until the task is gone so it no longer holds the connection.
            let _ = handle.await;
            tracing::debug!("Telegram worker halted");
        }
    }

    fn ensure_running(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        let alive = handle.as_ref().is_some_and(|h| !h.is_finished());
        if !alive {
            if handle.is_some() {
                tracing::warn!("Telegram worker was not running, restarting it");
            }
            *handle = Some(tokio::spawn(run(self.link.clone(), self.budget.clone())));
        }
    }

    fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for WorkerTransmitter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}
