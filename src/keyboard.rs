//! Reply markup attached to outgoing messages.

use serde::{Deserialize, Serialize};

/// A single inline keyboard button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: None,
            url: Some(url.into()),
        }
    }
}

/// Buttons shown under a message; presses arrive as callback queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a button to the last row, starting one if there is none.
    pub fn button(mut self, button: InlineButton) -> Self {
        match self.inline_keyboard.last_mut() {
            Some(row) => row.push(button),
            None => self.inline_keyboard.push(vec![button]),
        }
        self
    }

    pub fn row(mut self) -> Self {
        self.inline_keyboard.push(Vec::new());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inline_keyboard.iter().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub request_contact: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub request_location: bool,
}

impl KeyboardButton {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_contact: false,
            request_location: false,
        }
    }

    pub fn contact(text: impl Into<String>) -> Self {
        Self {
            request_contact: true,
            ..Self::text(text)
        }
    }

    pub fn location(text: impl Into<String>) -> Self {
        Self {
            request_location: true,
            ..Self::text(text)
        }
    }
}

/// Custom keyboard replacing the client's text input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyKeyboard {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    #[serde(default)]
    pub resize_keyboard: bool,
    #[serde(default)]
    pub one_time_keyboard: bool,
}

impl ReplyKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn button(mut self, button: KeyboardButton) -> Self {
        match self.keyboard.last_mut() {
            Some(row) => row.push(button),
            None => self.keyboard.push(vec![button]),
        }
        self
    }

    pub fn row(mut self) -> Self {
        self.keyboard.push(Vec::new());
        self
    }

    pub fn resize(mut self, resize: bool) -> Self {
        self.resize_keyboard = resize;
        self
    }

    pub fn one_time(mut self, one_time: bool) -> Self {
        self.one_time_keyboard = one_time;
        self
    }
}

/// Value of the `reply_markup` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReplyMarkup {
    Inline(InlineKeyboard),
    Reply(ReplyKeyboard),
    Remove {
        remove_keyboard: bool,
        selective: bool,
    },
    ForceReply {
        force_reply: bool,
        selective: bool,
    },
}

impl ReplyMarkup {
    pub fn remove(selective: bool) -> Self {
        Self::Remove {
            remove_keyboard: true,
            selective,
        }
    }

    pub fn force_reply(selective: bool) -> Self {
        Self::ForceReply {
            force_reply: true,
            selective,
        }
    }
}

impl From<InlineKeyboard> for ReplyMarkup {
    fn from(keyboard: InlineKeyboard) -> Self {
        Self::Inline(keyboard)
    }
}

impl From<ReplyKeyboard> for ReplyMarkup {
    fn from(keyboard: ReplyKeyboard) -> Self {
        Self::Reply(keyboard)
    }
}
