//! Core data types flowing through the pipeline.

mod history;
mod message;

pub use history::HistoryRecord;
pub use message::{sanitize_content, Message, EMOJI_FALLBACK};
