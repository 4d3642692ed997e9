//! Telegram adapters.
//!
//! - [`source::TelegramSource`] implements the `tga-core` MessageSource over
//!   MTProto (user session, needed to read channel history).
//! - [`notify::TelegramNotifier`] implements the Notifier port over the Bot API.

pub mod notify;
pub mod source;

pub use notify::TelegramNotifier;
pub use source::{TelegramSettings, TelegramSource};
