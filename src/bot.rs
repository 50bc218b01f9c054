//! Bot facade: polling, decoding and the outgoing Bot API calls.

use crate::config::{BotConfig, Regime};
use crate::decoder::{check_reply, parse_result, ResponseDecoder, WireFile};
use crate::error::UploadError;
use crate::event::{BotUser, Event, FileInfo};
use crate::keyboard::{InlineKeyboard, ReplyMarkup};
use crate::lifecycle::ConnectionLifecycle;
use crate::platform::{ResourceBudget, Unbounded};
use crate::poller::{UpdatePoller, GET_UPDATES};
use crate::slot::{Command, Completion};
use crate::transmitter::{self, exchange_within, SharedLink, Transmitter};
use crate::transport::{ByteConnection, TlsConnection};
use crate::upload::{FileSource, FileUploadSession, UploadJob};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;

/// Text formatting of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    Markdown,
    #[serde(rename = "HTML")]
    Html,
}

/// Destination of a message: a numeric chat or a public `@channel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChatTarget {
    Id(i64),
    Username(String),
}

impl From<i64> for ChatTarget {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for ChatTarget {
    fn from(name: &str) -> Self {
        if name.starts_with('@') {
            Self::Username(name.to_string())
        } else {
            Self::Username(format!("@{name}"))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    pub parse_mode: Option<ParseMode>,
    pub reply_markup: Option<ReplyMarkup>,
    pub disable_notification: bool,
    pub reply_to_message_id: Option<i64>,
}

impl MessageOptions {
    pub fn parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }

    pub fn markup(mut self, markup: impl Into<ReplyMarkup>) -> Self {
        self.reply_markup = Some(markup.into());
        self
    }

    /// Ask the client to open a reply to this message.
    pub fn force_reply(mut self) -> Self {
        self.reply_markup = Some(ReplyMarkup::force_reply(true));
        self
    }

    pub fn silent(mut self) -> Self {
        self.disable_notification = true;
        self
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }
}

/// Long-polling Telegram bot over one persistent connection.
pub struct TelegramBot {
    config: BotConfig,
    link: SharedLink,
    transmitter: Box<dyn Transmitter>,
    poller: UpdatePoller,
    decoder: ResponseDecoder,
    me: Option<BotUser>,
}

impl TelegramBot {
    pub fn new(config: BotConfig, conn: Box<dyn ByteConnection>) -> Self {
        Self::with_budget(config, conn, Arc::new(Unbounded))
    }

    /// Must be called inside a tokio runtime when the regime is `Auto`.
    pub fn with_budget(
        config: BotConfig,
        conn: Box<dyn ByteConnection>,
        budget: Arc<dyn ResourceBudget>,
    ) -> Self {
        let lifecycle = ConnectionLifecycle::new(conn, &config);
        let link = SharedLink::new(lifecycle, config.watchdog_interval());
        let transmitter = transmitter::for_regime(config.regime, link.clone(), budget);
        tracing::debug!("Telegram bot using {:?} transmitter", transmitter.regime());
        Self {
            poller: UpdatePoller::new(&config),
            decoder: ResponseDecoder::new(),
            config,
            link,
            transmitter,
            me: None,
        }
    }

    /// Bot over TLS with the trust settings from `config`.
    pub fn over_tls(config: BotConfig) -> anyhow::Result<Self> {
        let trust = config.tls_trust()?;
        let conn = TlsConnection::new(&config.host, &trust)?;
        Ok(Self::new(config, Box::new(conn)))
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn regime(&self) -> Regime {
        self.transmitter.regime()
    }

    pub fn is_connected(&self) -> bool {
        self.link.status.is_connected()
    }

    pub fn is_transmitter_running(&self) -> bool {
        self.transmitter.is_running()
    }

    pub fn me(&self) -> Option<&BotUser> {
        self.me.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.me.as_ref().and_then(|u| u.username.as_deref())
    }

    pub fn offset(&self) -> i64 {
        self.decoder.offset()
    }

    /// Raw payload of the last poll reply that could not be used.
    pub fn last_diagnostic(&self) -> Option<&str> {
        self.decoder.last_diagnostic()
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Connect, start the transmitter and look up the bot's identity.
    pub async fn begin(&mut self) -> anyhow::Result<BotUser> {
        if !self.link.lifecycle.lock().await.connect().await {
            anyhow::bail!("unable to connect to Telegram server {}", self.config.host);
        }
        self.transmitter.ensure_running();

        let me = self.get_me().await?;
        tracing::info!(
            "Telegram bot @{} ready (id {})",
            me.username.as_deref().unwrap_or("?"),
            me.id
        );
        self.me = Some(me.clone());
        Ok(me)
    }

    /// Tear the connection down and build it again. The slot is emptied.
    pub async fn reset(&self) -> bool {
        self.transmitter.halt().await;
        let connected = self.link.lifecycle.lock().await.reset().await;
        self.link.slot.clear();
        self.transmitter.ensure_running();
        connected
    }

    /// One scheduling turn: watchdog, poll if due, move the pending command.
    pub async fn tick(&mut self) {
        let now = Instant::now();
        let watchdog = self.config.watchdog_interval();
        if self.link.status.is_stale(now, watchdog) {
            tracing::warn!("Telegram watchdog: nothing heard for {watchdog:?}, resetting connection");
            self.reset().await;
        }
        self.transmitter.ensure_running();

        if self.link.status.is_connected() {
            self.poller.tick(now, &self.link.slot, self.decoder.offset());
        }
        self.transmitter.drain().await;
    }

    /// Next event, polling when nothing is queued. `NoData` while waiting.
    pub async fn get_new_message(&mut self) -> Event {
        if let Some(event) = self.decoder.next_backlog() {
            return self.resolve_document(event).await;
        }

        // A reply the worker finished since the last call is decoded before
        // the poller runs, so the next poll carries the advanced offset.
        if let Some(event) = self.take_reply().await {
            return event;
        }
        self.tick().await;
        self.take_reply().await.unwrap_or(Event::NoData)
    }

    /// Event of a finished poll, `None` when there is no poll reply waiting.
    async fn take_reply(&mut self) -> Option<Event> {
        let done = self.link.slot.take_completion()?;
        if done.operation != GET_UPDATES {
            check_command_reply(&done);
            return None;
        }
        let event = self.decoder.decode(&done.payload);
        Some(self.resolve_document(event).await)
    }

    async fn resolve_document(&self, event: Event) -> Event {
        let (origin, mut document) = match event {
            Event::Document { origin, document } => (origin, document),
            other => return other,
        };
        match self.get_file(&document.file_id).await {
            Ok(info) => {
                document.resolved_url = Some(info.url);
                document.size = info.size.or(document.size);
                document.exists = true;
            }
            Err(e) => tracing::warn!("Telegram getFile for {} failed: {e}", document.file_id),
        }
        Event::Document { origin, document }
    }

    // ── Command path ────────────────────────────────────────────

    /// Best-effort submission; false when disconnected or the slot is busy.
    pub fn submit(&self, operation: &str, body: String) -> bool {
        if !self.link.status.is_connected() {
            tracing::warn!("Telegram not connected, dropping {operation}");
            return false;
        }
        if !self.link.slot.try_submit(Command::new(operation, body)) {
            tracing::warn!("Telegram command slot busy, dropping {operation}");
            return false;
        }
        true
    }

    /// Full request/response cycle on the calling task, whatever the regime.
    ///
    /// Reserves the slot and holds the connection lock, so it fails instead
    /// of interleaving with an exchange already in flight.
    pub async fn submit_and_wait(&self, operation: &str, body: String) -> anyhow::Result<String> {
        if !self.link.slot.try_reserve() {
            anyhow::bail!("command slot busy, cannot run {operation}");
        }
        let result = {
            let mut lifecycle = self.link.lifecycle.lock().await;
            exchange_within(
                &mut lifecycle,
                &Command::new(operation, body),
                self.link.deadline,
            )
            .await
        };
        self.link.slot.complete(None);

        let response = result.map_err(|e| anyhow::anyhow!("Telegram {operation} failed: {e}"))?;
        Ok(response.body)
    }

    async fn dispatch(&self, operation: &str, body: serde_json::Value) -> bool {
        if !self.submit(operation, body.to_string()) {
            return false;
        }
        self.transmitter.drain().await;
        true
    }

    // ── Lookups ─────────────────────────────────────────────────

    pub async fn get_me(&self) -> anyhow::Result<BotUser> {
        let payload = self.submit_and_wait("getMe", "{}".to_string()).await?;
        Ok(parse_result(&payload)?)
    }

    /// Resolve a `file_id` to a download URL.
    pub async fn get_file(&self, file_id: &str) -> anyhow::Result<FileInfo> {
        let body = serde_json::json!({ "file_id": file_id }).to_string();
        let payload = self.submit_and_wait("getFile", body).await?;
        let file: WireFile = parse_result(&payload)?;
        let path = file
            .file_path
            .ok_or_else(|| anyhow::anyhow!("getFile for {file_id} returned no file_path"))?;
        Ok(FileInfo {
            url: self.file_url(&path),
            file_id: file.file_id,
            size: file.file_size,
        })
    }

    pub fn file_url(&self, file_path: &str) -> String {
        format!(
            "https://{}/file/bot{}/{}",
            self.config.host, self.config.token, file_path
        )
    }

    // ── Sending ─────────────────────────────────────────────────

    pub async fn send_message(
        &self,
        chat: impl Into<ChatTarget>,
        text: &str,
        options: &MessageOptions,
    ) -> bool {
        self.dispatch("sendMessage", build_message_json(&chat.into(), text, options))
            .await
    }

    /// Plain text to a user by id.
    pub async fn send_to(&self, user_id: i64, text: &str) -> bool {
        self.send_message(user_id, text, &MessageOptions::default())
            .await
    }

    /// Post to a public channel, `@` prefix optional.
    pub async fn send_to_channel(&self, channel: &str, text: &str, silent: bool) -> bool {
        let options = MessageOptions {
            disable_notification: silent,
            ..MessageOptions::default()
        };
        self.send_message(channel, text, &options).await
    }

    /// Send a photo by URL (Telegram will download it)
    pub async fn send_photo_by_url(&self, chat_id: i64, url: &str, caption: Option<&str>) -> bool {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "photo": url,
        });
        if let Some(cap) = caption {
            body["caption"] = serde_json::Value::String(cap.to_string());
        }
        self.dispatch("sendPhoto", body).await
    }

    /// Upload a local image as a photo.
    pub async fn send_photo_by_file(&self, chat_id: i64, path: &Path) -> Result<(), UploadError> {
        let source = FileSource::open(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo.jpg".to_string());
        self.upload(UploadJob::photo(chat_id, name, Box::new(source)))
            .await
    }

    /// Upload any [`UploadJob`].
    pub async fn upload(&self, job: UploadJob) -> Result<(), UploadError> {
        FileUploadSession::new(&self.link, self.config.upload_chunk())
            .upload(job)
            .await
    }

    /// Answer a callback query (dismiss the loading spinner on a button press).
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> bool {
        let mut body = serde_json::json!({
            "callback_query_id": callback_query_id,
            "show_alert": show_alert,
        });
        if let Some(t) = text {
            body["text"] = serde_json::Value::String(t.to_string());
        }
        self.dispatch("answerCallbackQuery", body).await
    }

    /// Send `text` and hide the custom keyboard.
    pub async fn remove_reply_keyboard(&self, chat_id: i64, text: &str, selective: bool) -> bool {
        let options = MessageOptions::default().markup(ReplyMarkup::remove(selective));
        self.send_message(chat_id, text, &options).await
    }

    /// Replace the inline keyboard of a sent message; `None` removes it.
    pub async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        keyboard: Option<&InlineKeyboard>,
    ) -> bool {
        self.dispatch(
            "editMessageReplyMarkup",
            build_edit_markup_json(chat_id, message_id, keyboard),
        )
        .await
    }
}

fn check_command_reply(done: &Completion) {
    match check_reply(&done.payload) {
        Ok(()) => tracing::debug!("Telegram {} accepted", done.operation),
        Err(e) => tracing::warn!("Telegram {} rejected: {e}", done.operation),
    }
}

/// Build the JSON body of `sendMessage` (for testing without network).
pub fn build_message_json(chat: &ChatTarget, text: &str, options: &MessageOptions) -> serde_json::Value {
    let mut body = serde_json::json!({
        "chat_id": chat,
        "text": text,
    });
    if let Some(mode) = options.parse_mode {
        body["parse_mode"] = serde_json::json!(mode);
    }
    if options.disable_notification {
        body["disable_notification"] = serde_json::Value::Bool(true);
    }
    if let Some(id) = options.reply_to_message_id {
        body["reply_to_message_id"] = serde_json::json!(id);
    }
    if let Some(markup) = &options.reply_markup {
        body["reply_markup"] = serde_json::json!(markup);
    }
    body
}

/// Build the JSON body of `editMessageReplyMarkup`.
pub fn build_edit_markup_json(
    chat_id: i64,
    message_id: i64,
    keyboard: Option<&InlineKeyboard>,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "message_id": message_id,
    });
    if let Some(kb) = keyboard {
        body["reply_markup"] = serde_json::json!(kb);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::InlineButton;
    use serde_json::json;

    #[test]
    fn chat_target_channel_gets_prefix() {
        assert_eq!(ChatTarget::from("news"), ChatTarget::Username("@news".into()));
        assert_eq!(ChatTarget::from("@news"), ChatTarget::Username("@news".into()));
        assert_eq!(serde_json::to_value(ChatTarget::from(-100_i64)).unwrap(), json!(-100));
    }

    #[test]
    fn message_json_minimal() {
        let body = build_message_json(&ChatTarget::Id(5), "hi", &MessageOptions::default());
        assert_eq!(body, json!({"chat_id": 5, "text": "hi"}));
    }

    #[test]
    fn message_json_with_everything() {
        let kb = InlineKeyboard::new().button(InlineButton::callback("Yes", "confirm_yes"));
        let options = MessageOptions::default()
            .parse_mode(ParseMode::Html)
            .markup(kb)
            .silent()
            .reply_to(17);
        let body = build_message_json(&ChatTarget::from("alerts"), "<b>x</b>", &options);
        assert_eq!(body["chat_id"], "@alerts");
        assert_eq!(body["parse_mode"], "HTML");
        assert_eq!(body["disable_notification"], true);
        assert_eq!(body["reply_to_message_id"], 17);
        assert_eq!(
            body["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            "confirm_yes"
        );
    }

    #[test]
    fn force_reply_markup() {
        let body = build_message_json(
            &ChatTarget::Id(1),
            "Your name?",
            &MessageOptions::default().force_reply(),
        );
        assert_eq!(body["reply_markup"], json!({"force_reply": true, "selective": true}));
    }

    #[test]
    fn markdown_mode_serializes_verbatim() {
        let body = build_message_json(
            &ChatTarget::Id(1),
            "*x*",
            &MessageOptions::default().parse_mode(ParseMode::Markdown),
        );
        assert_eq!(body["parse_mode"], "Markdown");
    }

    #[test]
    fn edit_markup_json() {
        assert_eq!(
            build_edit_markup_json(1, 2, None),
            json!({"chat_id": 1, "message_id": 2})
        );
        let kb = InlineKeyboard::new().button(InlineButton::callback("Off", "off"));
        let body = build_edit_markup_json(1, 2, Some(&kb));
        assert_eq!(body["reply_markup"]["inline_keyboard"][0][0]["text"], "Off");
    }
}
