//! Database module for the mail consumer
//!
//! SQLite storage for mail accounts, their rules and the correspondents
//! created while consuming mail.

use crate::consumer::CorrespondentDirectory;
use crate::filters::{
    AttachmentScope, CorrespondentSource, MailActionKind, MailRule, TitleSource,
};
use crate::mail::{MailAccount, SecurityType};
use rusqlite::{params, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroizing;

// Connection pooling
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

const ACCOUNT_COLUMNS: &str =
    "id, name, imap_server, imap_port, imap_security, username, password, character_set";

const RULE_COLUMNS: &str = r#"id, account_id, name, folder, "order", maximum_age,
    filter_from, filter_subject, filter_body, filter_attachment_filename,
    attachment_type, assign_title_from, assign_correspondent_from,
    assign_correspondent, assign_document_type, assign_tags,
    action, action_parameter"#;

/// Database manager for thread-safe SQLite access
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(&db_path)
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        "#,
        )?;
        conn.execute_batch(include_str!("schema.sql"))?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory database (for testing)
    ///
    /// Every in-memory connection is its own database, so the pool holds
    /// exactly one connection and never recycles it.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // =========================================================================
    // MAIL ACCOUNTS
    // =========================================================================

    pub fn add_mail_account(&self, account: &MailAccount) -> DbResult<i64> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO mail_accounts (
                name, imap_server, imap_port, imap_security,
                username, password, character_set
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                account.name,
                account.imap_server,
                account.imap_port,
                account.imap_security.as_str(),
                account.username,
                account.password.as_str(),
                account.character_set,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// All accounts, by name
    pub fn get_mail_accounts(&self) -> DbResult<Vec<MailAccount>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mail_accounts ORDER BY name ASC",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    pub fn get_mail_account(&self, id: i64) -> DbResult<MailAccount> {
        let conn = self.get_conn()?;
        conn.query_row(
            &format!("SELECT {} FROM mail_accounts WHERE id = ?1", ACCOUNT_COLUMNS),
            [id],
            account_from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("mail account {}", id)))
    }

    pub fn delete_mail_account(&self, id: i64) -> DbResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM mail_accounts WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("mail account {}", id)));
        }
        Ok(())
    }

    // =========================================================================
    // MAIL RULES
    // =========================================================================

    pub fn add_mail_rule(&self, rule: &MailRule) -> DbResult<i64> {
        let tags = serde_json::to_string(&rule.assign_tags)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO mail_rules (
                account_id, name, folder, "order", maximum_age,
                filter_from, filter_subject, filter_body, filter_attachment_filename,
                attachment_type, assign_title_from, assign_correspondent_from,
                assign_correspondent, assign_document_type, assign_tags,
                action, action_parameter
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                rule.account_id,
                rule.name,
                rule.folder,
                rule.order,
                rule.maximum_age,
                rule.filter_from,
                rule.filter_subject,
                rule.filter_body,
                rule.filter_attachment_filename,
                rule.attachment_type.as_str(),
                rule.assign_title_from.as_str(),
                rule.assign_correspondent_from.as_str(),
                rule.assign_correspondent,
                rule.assign_document_type,
                tags,
                rule.action.as_str(),
                rule.action_parameter,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Rules of one account in execution order
    pub fn get_mail_rules(&self, account_id: i64) -> DbResult<Vec<MailRule>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM mail_rules WHERE account_id = ?1 ORDER BY "order" ASC, id ASC"#,
            RULE_COLUMNS
        ))?;

        let rules = stmt
            .query_map([account_id], rule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    pub fn delete_mail_rule(&self, id: i64) -> DbResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM mail_rules WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(DbError::NotFound(format!("mail rule {}", id)));
        }
        Ok(())
    }

    // =========================================================================
    // CORRESPONDENTS
    // =========================================================================

    pub fn get_or_create_correspondent(&self, name: &str) -> DbResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO correspondents (name) VALUES (?1)",
            [name],
        )?;
        let id = conn.query_row(
            "SELECT id FROM correspondents WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(id)
    }
}

impl CorrespondentDirectory for Database {
    fn get_or_create(&self, name: &str) -> Result<i64, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.get_or_create_correspondent(name)?)
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<MailAccount> {
    let security: String = row.get(4)?;
    let password: String = row.get(6)?;

    Ok(MailAccount {
        id: row.get(0)?,
        name: row.get(1)?,
        imap_server: row.get(2)?,
        imap_port: row.get(3)?,
        imap_security: parse_column(4, SecurityType::from_str(&security))?,
        username: row.get(5)?,
        password: Zeroizing::new(password),
        character_set: row.get(7)?,
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<MailRule> {
    let attachment_type: String = row.get(10)?;
    let title_from: String = row.get(11)?;
    let correspondent_from: String = row.get(12)?;
    let tags: String = row.get(15)?;
    let action: String = row.get(16)?;

    Ok(MailRule {
        id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        folder: row.get(3)?,
        order: row.get(4)?,
        maximum_age: row.get(5)?,
        filter_from: row.get(6)?,
        filter_subject: row.get(7)?,
        filter_body: row.get(8)?,
        filter_attachment_filename: row.get(9)?,
        attachment_type: parse_column(10, AttachmentScope::from_str(&attachment_type))?,
        assign_title_from: parse_column(11, TitleSource::from_str(&title_from))?,
        assign_correspondent_from: parse_column(
            12,
            CorrespondentSource::from_str(&correspondent_from),
        )?,
        assign_correspondent: row.get(13)?,
        assign_document_type: row.get(14)?,
        assign_tags: parse_column(15, serde_json::from_str(&tags).map_err(|e| e.to_string()))?,
        action: parse_column(16, MailActionKind::from_str(&action))?,
        action_parameter: row.get(17)?,
    })
}

/// Surface an invalid stored value as a column conversion error
fn parse_column<T>(index: usize, value: Result<T, String>) -> rusqlite::Result<T> {
    value.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(DbError::Serialization(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str) -> MailAccount {
        MailAccount::new(name, "imap.example.com", SecurityType::STARTTLS, "user", "pässword")
    }

    #[test]
    fn test_account_round_trip() {
        let db = Database::in_memory().expect("Failed to create in-memory database");

        let id = db.add_mail_account(&account("Work")).expect("Failed to add account");
        assert!(id > 0);

        let stored = db.get_mail_account(id).unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.name, "Work");
        assert_eq!(stored.imap_port, 143);
        assert_eq!(stored.imap_security, SecurityType::STARTTLS);
        assert_eq!(stored.password.as_str(), "pässword");
        assert_eq!(stored.character_set, "UTF-8");
    }

    #[test]
    fn test_accounts_sorted_by_name() {
        let db = Database::in_memory().unwrap();
        db.add_mail_account(&account("Private")).unwrap();
        db.add_mail_account(&account("Accounting")).unwrap();

        let names: Vec<_> = db
            .get_mail_accounts()
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Accounting", "Private"]);
    }

    #[test]
    fn test_missing_account() {
        let db = Database::in_memory().unwrap();
        assert!(matches!(db.get_mail_account(42), Err(DbError::NotFound(_))));
        assert!(matches!(db.delete_mail_account(42), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_rules_in_execution_order() {
        let db = Database::in_memory().unwrap();
        let account_id = db.add_mail_account(&account("Work")).unwrap();

        let mut late = MailRule::new(account_id, "late");
        late.order = 5;
        late.action = MailActionKind::Tag;
        late.action_parameter = Some("Invoices".into());
        late.assign_tags = vec![3, 1];
        late.filter_attachment_filename = Some("*.pdf".into());

        let mut early = MailRule::new(account_id, "early");
        early.order = 1;
        early.assign_correspondent_from = CorrespondentSource::FromName;
        early.attachment_type = AttachmentScope::Everything;

        db.add_mail_rule(&late).unwrap();
        db.add_mail_rule(&early).unwrap();

        let rules = db.get_mail_rules(account_id).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "early");
        assert_eq!(rules[0].assign_correspondent_from, CorrespondentSource::FromName);
        assert_eq!(rules[0].attachment_type, AttachmentScope::Everything);

        let late = &rules[1];
        assert_eq!(late.action, MailActionKind::Tag);
        assert_eq!(late.action_parameter.as_deref(), Some("Invoices"));
        assert_eq!(late.assign_tags, vec![3, 1]);
        assert_eq!(late.filter_attachment_filename.as_deref(), Some("*.pdf"));
        assert_eq!(late.maximum_age, 30);
    }

    #[test]
    fn test_deleting_account_removes_rules() {
        let db = Database::in_memory().unwrap();
        let account_id = db.add_mail_account(&account("Work")).unwrap();
        db.add_mail_rule(&MailRule::new(account_id, "r")).unwrap();

        db.delete_mail_account(account_id).unwrap();
        assert!(db.get_mail_rules(account_id).unwrap().is_empty());
    }

    #[test]
    fn test_get_or_create_correspondent() {
        let db = Database::in_memory().unwrap();
        let first = db.get_or_create_correspondent("ACME Billing").unwrap();
        let again = db.get_or_create("ACME Billing").unwrap();
        let other = db.get_or_create("billing@acme.test").unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
    }
}
