//! Domain models for fetched messages and their summaries

mod message;
mod summary;

pub use message::{Header, Message, MessageBuilder, MessageId};
pub use summary::{SUMMARY_FAILED, Summary};
