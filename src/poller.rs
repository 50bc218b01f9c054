use crate::config::BotConfig;
use crate::slot::{Command, CommandSlot};
use std::time::Duration;
use tokio::time::Instant;

pub const GET_UPDATES: &str = "getUpdates";

/// Enqueues `getUpdates` at most once per poll interval.
#[derive(Debug)]
pub struct UpdatePoller {
    interval: Duration,
    long_poll_timeout_secs: u32,
    allowed_updates: Vec<String>,
    last_poll: Option<Instant>,
}

impl UpdatePoller {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            long_poll_timeout_secs: config.long_poll_timeout_secs,
            allowed_updates: config.allowed_updates.clone(),
            last_poll: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Request body; one update per page, offset only once known.
    pub fn body(&self, offset: i64) -> String {
        let mut body = serde_json::json!({
            "limit": 1,
            "timeout": self.long_poll_timeout_secs,
            "allowed_updates": self.allowed_updates,
        });
        if offset != 0 {
            body["offset"] = serde_json::Value::from(offset);
        }
        body.to_string()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last_poll
            .map_or(true, |at| now.saturating_duration_since(at) >= self.interval)
    }

    /// Submit a poll if the interval elapsed, the slot is free and the last
    /// reply has been read (so `offset` already covers it).
    pub fn tick(&mut self, now: Instant, slot: &CommandSlot, offset: i64) -> bool {
        if !self.is_due(now) {
            return false;
        }
        if !slot.try_submit_after_read(Command::new(GET_UPDATES, self.body(offset))) {
            return false;
        }
        self.last_poll = Some(now);
        true
    }
}
