//! Mail rules
//!
//! A rule selects a folder, narrows it with server-side filters, consumes the
//! matching attachments and then applies one action to the handled mails.

pub mod actions;
pub mod attachments;
pub mod criteria;
pub mod engine;

pub use actions::RuleAction;
pub use attachments::AttachmentPipeline;
pub use criteria::{make_criteria, make_criteria_on, make_search_query};
pub use engine::{process_mail_accounts, MailAccountHandler};

use crate::mail::MailError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which MIME parts a rule considers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentScope {
    /// Only parts with `Content-Disposition: attachment`
    #[default]
    AttachmentsOnly,
    /// Inline parts too
    Everything,
}

/// Where a consumed document's title comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TitleSource {
    #[default]
    FromSubject,
    FromFilename,
}

/// Where a consumed document's correspondent comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CorrespondentSource {
    #[default]
    FromNothing,
    FromEmail,
    FromName,
    FromCustom,
}

/// Post-consume action kind. The parameter lives on the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MailActionKind {
    Delete,
    Move,
    #[default]
    MarkRead,
    Flag,
    Tag,
}

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }

            pub fn from_str(s: &str) -> Result<Self, String> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($ty), s)),
                }
            }
        }
    };
}

str_enum!(AttachmentScope { AttachmentsOnly => "attachments_only", Everything => "everything" });
str_enum!(TitleSource { FromSubject => "from_subject", FromFilename => "from_filename" });
str_enum!(CorrespondentSource {
    FromNothing => "from_nothing",
    FromEmail => "from_email",
    FromName => "from_name",
    FromCustom => "from_custom",
});
str_enum!(MailActionKind {
    Delete => "delete",
    Move => "move",
    MarkRead => "mark_read",
    Flag => "flag",
    Tag => "tag",
});

/// Mail rule bound to one account and one folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailRule {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub folder: String,
    /// Execution order within the account, ascending
    pub order: i32,
    /// Days; 0 means no age limit
    pub maximum_age: u32,
    pub filter_from: Option<String>,
    pub filter_subject: Option<String>,
    pub filter_body: Option<String>,
    /// Case-insensitive glob on attachment filenames
    pub filter_attachment_filename: Option<String>,
    pub attachment_type: AttachmentScope,
    pub assign_title_from: TitleSource,
    pub assign_correspondent_from: CorrespondentSource,
    pub assign_correspondent: Option<i64>,
    pub assign_document_type: Option<i64>,
    pub assign_tags: Vec<i64>,
    pub action: MailActionKind,
    /// Target folder for Move, keyword for Tag
    pub action_parameter: Option<String>,
}

impl MailRule {
    pub fn new(account_id: i64, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            account_id,
            name: name.into(),
            folder: "INBOX".to_string(),
            order: 0,
            maximum_age: 30,
            filter_from: None,
            filter_subject: None,
            filter_body: None,
            filter_attachment_filename: None,
            attachment_type: AttachmentScope::default(),
            assign_title_from: TitleSource::default(),
            assign_correspondent_from: CorrespondentSource::default(),
            assign_correspondent: None,
            assign_document_type: None,
            assign_tags: Vec::new(),
            action: MailActionKind::default(),
            action_parameter: None,
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.folder.trim().is_empty() {
            errors.push("Folder is required".to_string());
        }
        let needs_parameter = matches!(self.action, MailActionKind::Move | MailActionKind::Tag);
        let has_parameter = self
            .action_parameter
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());
        if needs_parameter && !has_parameter {
            errors.push(format!("Action {} requires a parameter", self.action.as_str()));
        }
        if self.assign_correspondent_from == CorrespondentSource::FromCustom
            && self.assign_correspondent.is_none()
        {
            errors.push("A custom correspondent must be selected".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl fmt::Display for MailRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Errors raised while processing accounts and rules. Each carries the
/// account or rule it belongs to.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Error while authenticating account {account}")]
    Authentication {
        account: String,
        #[source]
        source: MailError,
    },

    #[error("Rule {rule}: Folder {folder} does not exist in account {account}")]
    FolderNotFound {
        rule: String,
        folder: String,
        account: String,
        #[source]
        source: MailError,
    },

    #[error("Rule {rule}: Error while fetching folder {folder}")]
    Fetch {
        rule: String,
        folder: String,
        #[source]
        source: MailError,
    },

    #[error("Rule {rule}: Error while processing post-consume actions")]
    PostConsume {
        rule: String,
        #[source]
        source: MailError,
    },

    #[error("Rule {rule}: Action {action} requires a parameter")]
    MissingParameter { rule: String, action: &'static str },

    #[error("Unable to store attachment {filename}")]
    Scratch {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to queue attachment {filename}")]
    Dispatch {
        filename: String,
        #[source]
        source: crate::consumer::DispatchError,
    },
}

/// Render an error with its whole source chain on one line
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
