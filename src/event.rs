//! Typed events produced from server updates.

use serde::{Deserialize, Serialize};

/// Who sent a message or pressed a button.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

/// Where an event came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Origin {
    pub sender: Sender,
    pub chat_id: i64,
    /// Set for groups and channels.
    pub chat_title: Option<String>,
    pub message_id: i64,
    /// Unix seconds.
    pub date: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallbackQuery {
    pub id: String,
    pub chat_instance: String,
    pub data: String,
    /// Text of the message the pressed keyboard is attached to.
    pub origin_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub user_id: Option<i64>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub phone_number: String,
    pub vcard: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    /// Download URL, filled in by a `getFile` lookup.
    pub resolved_url: Option<String>,
    pub size: Option<u64>,
    /// True once the lookup succeeded.
    pub exists: bool,
}

/// One decoded update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    NoData,
    Text {
        origin: Origin,
        text: String,
    },
    Query {
        origin: Origin,
        query: CallbackQuery,
    },
    Location {
        origin: Origin,
        latitude: f64,
        longitude: f64,
    },
    Contact {
        origin: Origin,
        contact: Contact,
    },
    Document {
        origin: Origin,
        document: Document,
    },
    Reply {
        origin: Origin,
        text: String,
        reply_to_message_id: i64,
        reply_to_text: Option<String>,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoData => "no_data",
            Self::Text { .. } => "text",
            Self::Query { .. } => "query",
            Self::Location { .. } => "location",
            Self::Contact { .. } => "contact",
            Self::Document { .. } => "document",
            Self::Reply { .. } => "reply",
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }

    pub fn origin(&self) -> Option<&Origin> {
        match self {
            Self::NoData => None,
            Self::Text { origin, .. }
            | Self::Query { origin, .. }
            | Self::Location { origin, .. }
            | Self::Contact { origin, .. }
            | Self::Document { origin, .. }
            | Self::Reply { origin, .. } => Some(origin),
        }
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.origin().map(|o| o.chat_id)
    }
}

/// The bot's own account, as reported by `getMe`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

/// Result of a `getFile` lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub file_id: String,
    pub url: String,
    pub size: Option<u64>,
}
