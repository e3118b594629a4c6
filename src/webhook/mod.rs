//! Signed webhook client for outbound notifications.

mod client;

pub use client::{SendOutcome, WebhookClient};
