//! Telegram Bot API client for one persistent connection.
//!
//! Commands go through a single-slot mailbox ([`slot::CommandSlot`]) so at
//! most one request is ever in flight; polling, ad-hoc sends and multipart
//! uploads all share it. The connection resets itself when a watchdog sees
//! no response for ten poll intervals.

pub mod bot;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod http;
pub mod keyboard;
pub mod lifecycle;
pub mod platform;
pub mod poller;
pub mod slot;
pub mod transmitter;
pub mod transport;
pub mod upload;

pub use bot::{ChatTarget, MessageOptions, ParseMode, TelegramBot};
pub use config::{BotConfig, Regime};
pub use error::{DecodeError, TransportError, UploadError};
pub use event::{BotUser, Event, FileInfo, Origin, Sender};
pub use keyboard::{InlineButton, InlineKeyboard, KeyboardButton, ReplyKeyboard, ReplyMarkup};
pub use platform::{ResourceBudget, Unbounded};
pub use transport::{ByteConnection, MemoryConnection, MemoryRemote, TlsConnection};
pub use upload::{ByteSource, FileSource, MemorySource, UploadJob};
