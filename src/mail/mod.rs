//! # Mail Module
//!
//! IMAP transport: account configuration, the mailbox session abstraction,
//! search queries and fetched message model.

pub mod client;
pub mod config;
pub mod imap;
pub mod message;
pub mod search;

use std::fmt;

// Re-export commonly used types
pub use client::{authenticate, ImapConnector, MailboxClient, MailboxConnector, SessionState};
pub use config::{MailAccount, SecurityType};
pub use self::imap::ImapMailbox;
pub use message::{MailAttachment, MailMessage, Uid};
pub use search::{SearchKey, SearchQuery};

/// Result type alias for mail operations
pub type MailResult<T> = Result<T, MailError>;

/// Unified error type for mail operations
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    /// LOGIN only carries 7-bit credentials; callers fall back to AUTH=PLAIN.
    #[error("Credentials cannot be encoded for LOGIN: {0}")]
    CredentialEncoding(String),

    #[error("Unable to select folder {folder}: {message}")]
    FolderSelect { folder: String, message: String },

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Invalid session state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: SessionState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::imap::Error> for MailError {
    fn from(e: ::imap::Error) -> Self {
        MailError::Imap(e.to_string())
    }
}

/// Standard flags plus user keywords, as written by STORE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFlag {
    Seen,
    Flagged,
    Deleted,
    Keyword(String),
}

impl fmt::Display for MessageFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageFlag::Seen => f.write_str("\\Seen"),
            MessageFlag::Flagged => f.write_str("\\Flagged"),
            MessageFlag::Deleted => f.write_str("\\Deleted"),
            MessageFlag::Keyword(keyword) => f.write_str(&search::atom(keyword)),
        }
    }
}

impl MessageFlag {
    /// User keyword in the same atom form UNKEYWORD searches for
    pub fn keyword(value: &str) -> Self {
        MessageFlag::Keyword(search::atom(value))
    }
}

/// Render uids as an IMAP sequence set ("1,5,9")
pub fn uid_set(uids: &[Uid]) -> String {
    uids.iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
