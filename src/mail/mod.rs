pub mod decoders;
pub mod extract;
pub mod fetcher;
pub mod imap_client;

pub use extract::{SaveDir, extract_attachments};
pub use fetcher::{Connect, FetchEngine, FetchParams, MailboxSession, RawMessage};
pub use imap_client::ImapConnector;
