use std::path::PathBuf;

/// Server-assigned message UID, unique and never reused within one mailbox.
pub type Uid = u32;

/// One message retrieved from the mailbox, held only for the cycle that fetched it.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub uid: Uid,
    pub from: String,
    pub subject: String,
    pub body: Vec<u8>,
}

/// Result of one fetch call: new messages in server order plus the highest uid among them.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub messages: Vec<FetchedMessage>,
    pub max_uid: Option<Uid>,
    /// New uids whose body could not be read; not part of `messages` or `max_uid`.
    pub skipped: Vec<Uid>,
}

impl FetchBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn uids(&self) -> Vec<Uid> {
        self.messages.iter().map(|m| m.uid).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Base name of the saved file.
    pub filename: String,
    pub path: PathBuf,
}
