use super::{perform, SharedLink, Transmitter};
use crate::config::Regime;
use async_trait::async_trait;

/// Performs the pending exchange on the caller's task.
pub struct InlineTransmitter {
    link: SharedLink,
}

impl InlineTransmitter {
    pub fn new(link: SharedLink) -> Self {
        Self { link }
    }
}

#[async_trait]
impl Transmitter for InlineTransmitter {
    fn regime(&self) -> Regime {
        Regime::Inline
    }

    async fn drain(&self) {
        if let Some(command) = self.link.slot.take_pending() {
            perform(&self.link, command).await;
        }
    }

    async fn halt(&self) {}

    fn ensure_running(&self) {}

    fn is_running(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Command;
    use crate::transmitter::tests::connected_link;
    use std::time::Duration;

    #[tokio::test]
    async fn drain_without_pending_does_nothing() {
        let (link, remote) = connected_link(Duration::from_secs(5)).await;
        let tx = InlineTransmitter::new(link.clone());
        tx.drain().await;
        assert!(remote.written().is_empty());
        assert!(!link.slot.is_busy());
    }

    #[tokio::test]
    async fn drain_runs_the_exchange_in_place() {
        let (link, remote) = connected_link(Duration::from_secs(5)).await;
        let tx = InlineTransmitter::new(link.clone());
        remote.push_response(r#"{"ok":true,"result":{"message_id":3}}"#);
        assert!(link.slot.try_submit(Command::new("sendMessage", r#"{"chat_id":1,"text":"x"}"#)));

        tx.drain().await;
        assert!(!link.slot.is_busy());
        assert_eq!(link.slot.take_completion().unwrap().operation, "sendMessage");
        assert!(String::from_utf8(remote.written()).unwrap().contains("/sendMessage HTTP/1.1"));
    }
}
