//! Post-consume actions
//!
//! Each action contributes a search pre-filter, so mails it already handled
//! are not matched again, and a server-side effect applied to the uids of the
//! mails that were consumed.

use super::{IngestError, MailActionKind, MailRule};
use crate::mail::{
    search::{atom, quote},
    MailResult, MailboxClient, MessageFlag, SearchKey, Uid,
};

/// Hosts that expose Gmail labels through X-GM-LABELS
const GMAIL_DOMAINS: [&str; 2] = ["gmail.com", "googlemail.com"];

/// Action bound to a rule at dispatch time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    Delete,
    Move { folder: String },
    MarkRead,
    Flag,
    /// `keyword` is the atom form used for UNKEYWORD and STORE, `label`
    /// the parameter as given, used for Gmail labels.
    Tag { keyword: String, label: String },
}

impl RuleAction {
    pub fn for_rule(rule: &MailRule) -> Result<Self, IngestError> {
        let parameter = || {
            rule.action_parameter
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .ok_or_else(|| IngestError::MissingParameter {
                    rule: rule.name.clone(),
                    action: rule.action.as_str(),
                })
        };

        Ok(match rule.action {
            MailActionKind::Delete => RuleAction::Delete,
            MailActionKind::Move => RuleAction::Move { folder: parameter()? },
            MailActionKind::MarkRead => RuleAction::MarkRead,
            MailActionKind::Flag => RuleAction::Flag,
            MailActionKind::Tag => {
                let label = parameter()?;
                let keyword = atom(&label);
                if keyword.is_empty() {
                    return Err(IngestError::MissingParameter {
                        rule: rule.name.clone(),
                        action: rule.action.as_str(),
                    });
                }
                RuleAction::Tag { keyword, label }
            }
        })
    }

    /// Search keys that exclude mail this action has already handled.
    ///
    /// For Tag the list holds the Gmail label as a positive key; the query
    /// builder negates it.
    pub fn criteria(&self) -> Vec<SearchKey> {
        match self {
            RuleAction::Delete | RuleAction::Move { .. } => Vec::new(),
            RuleAction::MarkRead => vec![SearchKey::Unseen],
            RuleAction::Flag => vec![SearchKey::Unflagged],
            RuleAction::Tag { keyword, label } => vec![
                SearchKey::Unkeyword(keyword.clone()),
                SearchKey::GmailLabel(label.clone()),
            ],
        }
    }

    pub fn post_consume(&self, mailbox: &mut dyn MailboxClient, uids: &[Uid]) -> MailResult<()> {
        if uids.is_empty() {
            return Ok(());
        }

        match self {
            RuleAction::Delete => mailbox.delete_messages(uids),
            RuleAction::Move { folder } => mailbox.move_messages(uids, folder),
            RuleAction::MarkRead => mailbox.add_flags(uids, &[MessageFlag::Seen]),
            RuleAction::Flag => mailbox.add_flags(uids, &[MessageFlag::Flagged]),
            RuleAction::Tag { keyword, label } => {
                // Gmail keeps labels outside the flag vocabulary
                if is_gmail_host(mailbox.host()) {
                    for uid in uids {
                        mailbox.raw_command(&format!(
                            "UID STORE {} X-GM-LABELS {}",
                            uid,
                            quote(label)
                        ))?;
                    }
                    Ok(())
                } else {
                    mailbox.add_flags(uids, &[MessageFlag::keyword(keyword)])
                }
            }
        }
    }
}

pub fn is_gmail_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    GMAIL_DOMAINS.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::client::testing::{Call, FakeMailbox};

    fn selected(host: &str) -> FakeMailbox {
        let mut mailbox = FakeMailbox::new(host);
        mailbox.login("u", "p").unwrap();
        mailbox.select_folder("INBOX").unwrap();
        mailbox.calls.clear();
        mailbox
    }

    fn tag(keyword: &str) -> RuleAction {
        RuleAction::Tag {
            keyword: keyword.into(),
            label: keyword.into(),
        }
    }

    fn rule(action: MailActionKind, parameter: Option<&str>) -> MailRule {
        let mut rule = MailRule::new(1, "r");
        rule.action = action;
        rule.action_parameter = parameter.map(str::to_string);
        rule
    }

    #[test]
    fn test_for_rule_requires_parameter() {
        assert!(matches!(
            RuleAction::for_rule(&rule(MailActionKind::Move, None)),
            Err(IngestError::MissingParameter { action: "move", .. })
        ));
        assert!(RuleAction::for_rule(&rule(MailActionKind::Tag, Some("  "))).is_err());
        assert_eq!(
            RuleAction::for_rule(&rule(MailActionKind::Move, Some("Archive"))).unwrap(),
            RuleAction::Move { folder: "Archive".into() }
        );
    }

    #[test]
    fn test_tag_keyword_is_normalized_once() {
        let action = RuleAction::for_rule(&rule(MailActionKind::Tag, Some(" My Invoices "))).unwrap();
        assert_eq!(
            action,
            RuleAction::Tag {
                keyword: "MyInvoices".into(),
                label: "My Invoices".into(),
            }
        );

        let mut mailbox = selected("imap.example.com");
        action.post_consume(&mut mailbox, &[9]).unwrap();
        let Call::AddFlags(_, flags) = &mailbox.calls[0] else {
            panic!("expected a flag store");
        };
        let stored = flags[0].to_string();

        let unkeyword = action
            .criteria()
            .into_iter()
            .find(|key| matches!(key, SearchKey::Unkeyword(_)))
            .unwrap()
            .to_string();
        assert_eq!(unkeyword, format!("UNKEYWORD {}", stored));
        assert_eq!(stored, "MyInvoices");

        // Nothing left once atom-specials are gone
        assert!(matches!(
            RuleAction::for_rule(&rule(MailActionKind::Tag, Some("(*)"))),
            Err(IngestError::MissingParameter { action: "tag", .. })
        ));
    }

    #[test]
    fn test_criteria_per_action() {
        assert!(RuleAction::Delete.criteria().is_empty());
        assert!(RuleAction::Move { folder: "x".into() }.criteria().is_empty());
        assert_eq!(RuleAction::MarkRead.criteria(), vec![SearchKey::Unseen]);
        assert_eq!(RuleAction::Flag.criteria(), vec![SearchKey::Unflagged]);
        assert_eq!(
            tag("Invoices").criteria(),
            vec![
                SearchKey::Unkeyword("Invoices".into()),
                SearchKey::GmailLabel("Invoices".into()),
            ]
        );
    }

    #[test]
    fn test_gmail_host_detection() {
        assert!(is_gmail_host("imap.gmail.com"));
        assert!(is_gmail_host("imap.googlemail.com"));
        assert!(is_gmail_host("IMAP.GMAIL.COM"));
        assert!(is_gmail_host("gmail.com"));
        assert!(!is_gmail_host("notgmail.com"));
        assert!(!is_gmail_host("imap.notgooglemail.com"));
        assert!(!is_gmail_host("gmail.com.example.org"));
        assert!(!is_gmail_host("imap.example.com"));
    }

    #[test]
    fn test_mark_read_and_flag_effects() {
        let mut mailbox = selected("imap.example.com");
        RuleAction::MarkRead.post_consume(&mut mailbox, &[1, 2]).unwrap();
        RuleAction::Flag.post_consume(&mut mailbox, &[3]).unwrap();

        assert_eq!(
            mailbox.calls,
            vec![
                Call::AddFlags(vec![1, 2], vec![MessageFlag::Seen]),
                Call::AddFlags(vec![3], vec![MessageFlag::Flagged]),
            ]
        );
    }

    #[test]
    fn test_move_and_delete_effects() {
        let mut mailbox = selected("imap.example.com");
        RuleAction::Move { folder: "Archive".into() }
            .post_consume(&mut mailbox, &[4])
            .unwrap();
        RuleAction::Delete.post_consume(&mut mailbox, &[5, 6]).unwrap();

        assert_eq!(
            mailbox.calls,
            vec![
                Call::Move(vec![4], "Archive".into()),
                Call::Delete(vec![5, 6]),
            ]
        );
    }

    #[test]
    fn test_tag_sets_keyword_on_regular_hosts() {
        let mut mailbox = selected("imap.example.com");
        tag("Invoices")
            .post_consume(&mut mailbox, &[7, 8])
            .unwrap();

        assert_eq!(
            mailbox.calls,
            vec![Call::AddFlags(vec![7, 8], vec![MessageFlag::Keyword("Invoices".into())])]
        );
    }

    #[test]
    fn test_tag_uses_gmail_labels_per_uid() {
        let mut mailbox = selected("imap.gmail.com");
        tag("Invoices")
            .post_consume(&mut mailbox, &[7, 8])
            .unwrap();

        assert_eq!(
            mailbox.calls,
            vec![
                Call::Raw("UID STORE 7 X-GM-LABELS \"Invoices\"".into()),
                Call::Raw("UID STORE 8 X-GM-LABELS \"Invoices\"".into()),
            ]
        );
    }

    #[test]
    fn test_empty_batch_touches_nothing() {
        let mut mailbox = selected("imap.gmail.com");
        tag("Invoices")
            .post_consume(&mut mailbox, &[])
            .unwrap();
        RuleAction::Delete.post_consume(&mut mailbox, &[]).unwrap();
        assert!(mailbox.calls.is_empty());
    }
}
