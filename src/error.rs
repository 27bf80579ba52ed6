//! Typed errors for the parts of the pipeline whose callers need to branch on them.

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::message::ExtractionResult;

/// Failure while extracting attachments from one message.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The message could not be parsed as a MIME entity.
    #[error("could not parse message: {0}")]
    Parse(#[from] mailparse::MailParseError),

    /// An attachment body could not be decoded from its transfer encoding.
    #[error("could not decode attachment '{name}': {source}")]
    Decode {
        name: String,
        saved: Vec<ExtractionResult>,
        source: mailparse::MailParseError,
    },

    /// Writing an attachment failed. `saved` holds what was written before the failure.
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        saved: Vec<ExtractionResult>,
        source: std::io::Error,
    },
}

impl ExtractError {
    /// Attachments already written for the message when the error occurred.
    pub fn saved(&self) -> &[ExtractionResult] {
        match self {
            Self::Parse(_) => &[],
            Self::Decode { saved, .. } | Self::Write { saved, .. } => saved,
        }
    }
}

/// Failure while loading or saving the watermark state file.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("I/O error on state file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The state file exists but does not hold a valid watermark.
    #[error("state file '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl StateError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
