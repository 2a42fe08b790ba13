//! Rule engine - runs an account's rules against its mailbox

use super::{error_chain, make_search_query, AttachmentPipeline, IngestError, MailRule, RuleAction};
use crate::db::{Database, DbResult};
use crate::mail::{authenticate, MailAccount, MailboxClient, MailboxConnector, Uid};
use chrono::Local;
use std::sync::Arc;

/// Processes mail accounts: one mailbox session per account, rules in order
pub struct MailAccountHandler {
    connector: Arc<dyn MailboxConnector>,
    pipeline: AttachmentPipeline,
}

impl MailAccountHandler {
    pub fn new(connector: Arc<dyn MailboxConnector>, pipeline: AttachmentPipeline) -> Self {
        Self { connector, pipeline }
    }

    /// Run every rule of `account`. Returns the number of attachments
    /// dispatched across all rules.
    ///
    /// A mailbox that cannot be opened is logged and yields 0. An
    /// authentication failure is logged and returned. Rule failures are
    /// logged and the next rule runs.
    pub fn handle_mail_account(
        &self,
        account: &MailAccount,
        rules: &[MailRule],
    ) -> Result<usize, IngestError> {
        let mut mailbox = match self.connector.connect(account) {
            Ok(mailbox) => mailbox,
            Err(e) => {
                log::error!(
                    "Error while opening mailbox of account {}: {}",
                    account,
                    error_chain(&e)
                );
                return Ok(0);
            }
        };

        let result = self.run_rules(mailbox.as_mut(), account, rules);

        if let Err(e) = mailbox.logout() {
            log::debug!("Account {}: Logout failed: {}", account, e);
        }
        result
    }

    fn run_rules(
        &self,
        mailbox: &mut dyn MailboxClient,
        account: &MailAccount,
        rules: &[MailRule],
    ) -> Result<usize, IngestError> {
        if let Err(source) = authenticate(mailbox, &account.username, &account.password) {
            let err = IngestError::Authentication {
                account: account.name.clone(),
                source,
            };
            log::error!("{}", error_chain(&err));
            return Err(err);
        }

        log::debug!(
            "Account {}: Processing {} rule(s)",
            account,
            rules.len()
        );

        let mut ordered: Vec<&MailRule> = rules.iter().collect();
        ordered.sort_by_key(|rule| (rule.order, rule.id));

        let mut total = 0;
        for rule in ordered {
            match self.handle_mail_rule(mailbox, account, rule) {
                Ok(count) => total += count,
                Err(e) => log::error!("{}", error_chain(&e)),
            }
        }
        Ok(total)
    }

    /// Run one rule against an authenticated mailbox. Returns the number of
    /// attachments dispatched.
    pub fn handle_mail_rule(
        &self,
        mailbox: &mut dyn MailboxClient,
        account: &MailAccount,
        rule: &MailRule,
    ) -> Result<usize, IngestError> {
        let action = RuleAction::for_rule(rule)?;

        log::debug!("Rule {}: Selecting folder {}", rule, rule.folder);
        if let Err(source) = mailbox.select_folder(&rule.folder) {
            // Diagnostics only; the select error is what gets reported
            match mailbox.list_folders() {
                Ok(folders) => log::info!(
                    "Rule {}: Available folders in account {}: {}",
                    rule,
                    account,
                    folders.join(", ")
                ),
                Err(e) => log::debug!("Rule {}: Unable to list folders: {}", rule, e),
            }
            return Err(IngestError::FolderNotFound {
                rule: rule.name.clone(),
                folder: rule.folder.clone(),
                account: account.name.clone(),
                source,
            });
        }

        let query = make_search_query(rule, Local::now().date_naive())?;
        log::debug!("Rule {}: Searching folder with criteria {}", rule, query);

        let messages = mailbox
            .fetch(&query, &account.character_set)
            .map_err(|source| IngestError::Fetch {
                rule: rule.name.clone(),
                folder: rule.folder.clone(),
                source,
            })?;

        log::debug!("Rule {}: Found {} message(s)", rule, messages.len());

        let mut processed_uids: Vec<Uid> = Vec::new();
        let mut total = 0;
        for message in &messages {
            match self.pipeline.handle_message(message, rule) {
                Ok(0) => {}
                Ok(count) => {
                    total += count;
                    processed_uids.push(message.uid);
                }
                Err(e) => log::error!(
                    "Rule {}: Error while processing mail {}: {}",
                    rule,
                    message.uid,
                    error_chain(&e)
                ),
            }
        }

        log::debug!(
            "Rule {}: Applying {} to {} message(s)",
            rule,
            rule.action.as_str(),
            processed_uids.len()
        );
        action
            .post_consume(mailbox, &processed_uids)
            .map_err(|source| IngestError::PostConsume {
                rule: rule.name.clone(),
                source,
            })?;

        Ok(total)
    }
}

/// Run every stored account with its rules. Account failures, including
/// rules that cannot be loaded, are logged and the next account runs.
/// Returns the number of attachments dispatched.
pub fn process_mail_accounts(handler: &MailAccountHandler, db: &Database) -> DbResult<usize> {
    let mut total = 0;

    for account in db.get_mail_accounts()? {
        let rules = match db.get_mail_rules(account.id) {
            Ok(rules) => rules,
            Err(e) => {
                log::error!("Unable to load mail rules of account {}: {}", account, e);
                continue;
            }
        };
        match handler.handle_mail_account(&account, &rules) {
            Ok(count) => total += count,
            Err(e) => log::debug!("Skipping account {}: {}", account, e),
        }
    }

    if total > 0 {
        log::info!("Dispatched {} attachment(s) for consumption", total);
    }
    Ok(total)
}
