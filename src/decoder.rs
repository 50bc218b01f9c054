//! Turns server payloads into [`Event`]s and tracks the update offset.

use crate::error::DecodeError;
use crate::event::{CallbackQuery, Contact, Document, Event, Origin, Sender};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;

// ── Wire shapes ─────────────────────────────────────────────────
//
// Required fields are plain types so a missing or mistyped one fails the
// decode; optional ones are `Option` and default to absent.

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: bool,
    error_code: Option<i64>,
    description: Option<String>,
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireUpdate {
    callback_query: Option<WireCallbackQuery>,
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChat {
    id: i64,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message_id: i64,
    from: Option<WireUser>,
    chat: WireChat,
    date: i64,
    text: Option<String>,
    caption: Option<String>,
    reply_to_message: Option<Box<WireMessage>>,
    location: Option<WireLocation>,
    contact: Option<WireContact>,
    document: Option<WireDocument>,
}

#[derive(Debug, Deserialize)]
struct WireCallbackQuery {
    id: String,
    from: WireUser,
    message: Option<WireMessage>,
    #[serde(default)]
    chat_instance: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct WireLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct WireContact {
    phone_number: String,
    first_name: String,
    last_name: Option<String>,
    user_id: Option<i64>,
    vcard: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    file_id: String,
    file_name: Option<String>,
    file_size: Option<u64>,
}

/// `getFile` result.
#[derive(Debug, Deserialize)]
pub struct WireFile {
    pub file_id: String,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
}

impl From<WireUser> for Sender {
    fn from(user: WireUser) -> Self {
        Self {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

impl WireMessage {
    fn origin(&mut self) -> Origin {
        Origin {
            sender: self.from.take().map(Sender::from).unwrap_or_default(),
            chat_id: self.chat.id,
            chat_title: self.chat.title.take(),
            message_id: self.message_id,
            date: self.date,
        }
    }
}

// ── Envelope helpers ────────────────────────────────────────────

fn open_envelope(payload: &str) -> Result<Value, DecodeError> {
    let envelope: Envelope = serde_json::from_str(payload)?;
    if !envelope.ok {
        return Err(DecodeError::NotOk {
            code: envelope.error_code,
            description: envelope.description.unwrap_or_default(),
        });
    }
    envelope.result.ok_or(DecodeError::MissingResult)
}

/// Check `ok` and decode `result` of a method reply.
pub fn parse_result<T: DeserializeOwned>(payload: &str) -> Result<T, DecodeError> {
    let result = open_envelope(payload)?;
    Ok(serde_json::from_value(result)?)
}

/// Check only the `ok` flag of a method reply.
pub fn check_reply(payload: &str) -> Result<(), DecodeError> {
    open_envelope(payload).map(|_| ())
}

// ── Decoder ─────────────────────────────────────────────────────

/// Stateful decoder for `getUpdates` replies.
///
/// Updates whose id is below the current offset are dropped; everything else
/// moves the offset to `update_id + 1`, even when the update itself cannot be
/// classified, so a malformed update is never requested again.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    offset: i64,
    backlog: VecDeque<Event>,
    last_diagnostic: Option<String>,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next update id to ask for; 0 until something was decoded.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Raw payload of the last reply that produced no event due to an error.
    pub fn last_diagnostic(&self) -> Option<&str> {
        self.last_diagnostic.as_deref()
    }

    /// Events decoded from an earlier reply that carried several updates.
    pub fn next_backlog(&mut self) -> Option<Event> {
        self.backlog.pop_front()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn decode(&mut self, payload: &str) -> Event {
        match self.decode_updates(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Telegram poll reply unusable: {e}");
                tracing::debug!("Telegram poll payload: {payload}");
                self.last_diagnostic = Some(payload.to_string());
                Event::NoData
            }
        }
    }

    fn decode_updates(&mut self, payload: &str) -> Result<Event, DecodeError> {
        let updates = match open_envelope(payload)? {
            Value::Array(updates) => updates,
            _ => return Err(DecodeError::Schema { field: "result" }),
        };

        let mut first: Option<Event> = None;
        for raw in updates {
            let Some(update_id) = raw.get("update_id").and_then(Value::as_i64) else {
                tracing::warn!("Telegram update without a numeric update_id, skipping");
                continue;
            };
            if update_id < self.offset {
                tracing::debug!(
                    "Telegram update {update_id} below offset {}, already processed",
                    self.offset
                );
                continue;
            }
            let Some(next) = update_id.checked_add(1) else {
                tracing::warn!("Telegram update_id {update_id} cannot be acknowledged, skipping");
                continue;
            };
            self.offset = next;

            match classify(raw) {
                Ok(Event::NoData) => {
                    tracing::debug!("Telegram update {update_id} carries nothing we handle");
                }
                Ok(event) => match first {
                    None => first = Some(event),
                    Some(_) => self.backlog.push_back(event),
                },
                Err(e) => tracing::warn!("Telegram update {update_id} malformed: {e}"),
            }
        }

        Ok(first.unwrap_or(Event::NoData))
    }
}

/// First match wins: callback query, then reply, location, contact,
/// document and plain text inside a message.
fn classify(raw: Value) -> Result<Event, DecodeError> {
    let update: WireUpdate = serde_json::from_value(raw)?;

    if let Some(cb) = update.callback_query {
        let (origin, origin_text) = match cb.message {
            Some(mut message) => {
                let mut origin = message.origin();
                origin.sender = Sender::from(cb.from);
                (origin, message.text)
            }
            None => (
                Origin {
                    sender: Sender::from(cb.from),
                    ..Origin::default()
                },
                None,
            ),
        };
        return Ok(Event::Query {
            origin,
            query: CallbackQuery {
                id: cb.id,
                chat_instance: cb.chat_instance,
                data: cb.data,
                origin_text,
            },
        });
    }

    let Some(mut message) = update.message else {
        return Ok(Event::NoData);
    };
    let origin = message.origin();

    if let Some(replied) = message.reply_to_message {
        return Ok(Event::Reply {
            origin,
            text: message.text.unwrap_or_default(),
            reply_to_message_id: replied.message_id,
            reply_to_text: replied.text,
        });
    }
    if let Some(loc) = message.location {
        return Ok(Event::Location {
            origin,
            latitude: loc.latitude,
            longitude: loc.longitude,
        });
    }
    if let Some(contact) = message.contact {
        return Ok(Event::Contact {
            origin,
            contact: Contact {
                user_id: contact.user_id,
                first_name: contact.first_name,
                last_name: contact.last_name,
                phone_number: contact.phone_number,
                vcard: contact.vcard,
            },
        });
    }
    if let Some(doc) = message.document {
        return Ok(Event::Document {
            origin,
            document: Document {
                file_id: doc.file_id,
                file_name: doc.file_name,
                caption: message.caption,
                resolved_url: None,
                size: doc.file_size,
                exists: false,
            },
        });
    }
    if let Some(text) = message.text {
        return Ok(Event::Text { origin, text });
    }
    Ok(Event::NoData)
}
