use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// One API call waiting to be transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub operation: String,
    pub body: String,
}

impl Command {
    pub fn new(operation: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            body: body.into(),
        }
    }
}

/// Raw reply of a finished exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub operation: String,
    pub payload: String,
}

/// Single-item mailbox between the side that issues commands and the side
/// that performs network I/O.
///
/// `busy` is claimed with a compare-and-swap, so of two racing submitters
/// exactly one wins and the loser never touches the pending command. The
/// slot stays busy until the consumer calls [`CommandSlot::complete`].
#[derive(Debug, Default)]
pub struct CommandSlot {
    busy: AtomicBool,
    pending: Mutex<Option<Command>>,
    completed: Mutex<Option<Completion>>,
    ready: Notify,
}

impl CommandSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, Option<Command>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn completed(&self) -> MutexGuard<'_, Option<Completion>> {
        self.completed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn claim(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the slot for `command`. Returns false, leaving everything
    /// untouched, when another command already holds it.
    pub fn try_submit(&self, command: Command) -> bool {
        let mut pending = self.pending();
        if !self.claim() {
            return false;
        }
        *pending = Some(command);
        drop(pending);
        self.ready.notify_one();
        true
    }

    /// [`CommandSlot::try_submit`], but also refused while the previous
    /// completion has not been taken.
    ///
    /// A completion is stored before `busy` is released, so once the claim
    /// succeeds the check below cannot miss one.
    pub fn try_submit_after_read(&self, command: Command) -> bool {
        let mut pending = self.pending();
        if !self.claim() {
            return false;
        }
        if self.has_completion() {
            self.busy.store(false, Ordering::Release);
            return false;
        }
        *pending = Some(command);
        drop(pending);
        self.ready.notify_one();
        true
    }

    /// Claim the slot without queueing anything, for exclusive use of the
    /// connection. Release with [`CommandSlot::complete`].
    pub fn try_reserve(&self) -> bool {
        let _pending = self.pending();
        self.claim()
    }

    pub fn take_pending(&self) -> Option<Command> {
        self.pending().take()
    }

    /// Wait until a command is submitted and take it.
    pub async fn next_pending(&self) -> Command {
        loop {
            let ready = self.ready.notified();
            if let Some(command) = self.take_pending() {
                return command;
            }
            ready.await;
        }
    }

    /// Publish the result (if any) of the exchange and free the slot.
    pub fn complete(&self, completion: Option<Completion>) {
        if let Some(completion) = completion {
            *self.completed() = Some(completion);
        }
        let _pending = self.pending();
        self.busy.store(false, Ordering::Release);
    }

    pub fn take_completion(&self) -> Option<Completion> {
        self.completed().take()
    }

    pub fn has_completion(&self) -> bool {
        self.completed().is_some()
    }

    /// Forget everything, used when the connection is reset.
    pub fn clear(&self) {
        let mut pending = self.pending();
        *pending = None;
        *self.completed() = None;
        self.busy.store(false, Ordering::Release);
    }
}
