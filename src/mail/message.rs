//! Fetched messages and their attachments

use mail_parser::{MessageParser, MimeHeaders};

/// IMAP UID, scoped to the selected folder
pub type Uid = u32;

/// A message returned by a rule's search. Lives for one rule pass only.
#[derive(Debug, Clone, Default)]
pub struct MailMessage {
    pub uid: Uid,
    pub subject: String,
    /// Raw sender address
    pub from: String,
    /// Parsed sender display name, if the header carried one
    pub from_name: Option<String>,
    pub attachments: Vec<MailAttachment>,
}

/// A single non-body MIME part
#[derive(Debug, Clone, Default)]
pub struct MailAttachment {
    pub filename: String,
    /// Lower-cased disposition type ("attachment", "inline", or empty)
    pub content_disposition: String,
    /// As declared by the sender. Not trusted for ingestion decisions.
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl MailMessage {
    /// Parse a raw RFC 822 message fetched under `uid`.
    pub fn parse(uid: Uid, raw: &[u8]) -> Option<Self> {
        let message = MessageParser::default().parse(raw)?;

        let sender = message.from().and_then(|addrs| addrs.first());
        let from = sender
            .and_then(|addr| addr.address())
            .map(|a| a.to_string())
            .unwrap_or_default();
        let from_name = sender
            .and_then(|addr| addr.name())
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let attachments = message
            .attachments()
            .map(|part| MailAttachment {
                filename: part.attachment_name().unwrap_or_default().to_string(),
                content_disposition: part
                    .content_disposition()
                    .map(|cd| cd.ctype().to_ascii_lowercase())
                    .unwrap_or_default(),
                content_type: part
                    .content_type()
                    .map(|ct| match ct.subtype() {
                        Some(sub) => format!("{}/{}", ct.ctype(), sub),
                        None => ct.ctype().to_string(),
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                payload: part.contents().to_vec(),
            })
            .collect();

        Some(Self {
            uid,
            subject: message.subject().unwrap_or_default().to_string(),
            from,
            from_name,
            attachments,
        })
    }
}
