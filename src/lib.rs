//! Incremental IMAP polling that saves flight-log attachments (.igc by default)
//! from new messages, processing each mailbox message at most once.

pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod mail;
pub mod store;
