//! Signal dispatch: rendering, channel transports, and the idempotent
//! delivery loop.

pub mod dispatcher;
pub mod render;
pub mod transport;

pub use dispatcher::{DispatchReport, DispatchStore, Dispatcher, PreferencesSource};
pub use render::{email_bodies, email_subject, telegram_text};
pub use transport::{
    DispatchError, EmailTransport, SmtpMailer, TelegramBot, TelegramTransport,
};
