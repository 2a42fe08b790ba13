//! Mail Account Configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// Transport security for the IMAP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecurityType {
    NONE,
    STARTTLS,
    #[default]
    SSL,
}

impl SecurityType {
    pub fn default_imap_port(&self) -> u16 {
        match self {
            SecurityType::SSL => 993,
            SecurityType::STARTTLS => 143,
            SecurityType::NONE => 143,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityType::NONE => "none",
            SecurityType::STARTTLS => "starttls",
            SecurityType::SSL => "ssl",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "none" => Ok(SecurityType::NONE),
            "starttls" => Ok(SecurityType::STARTTLS),
            "ssl" => Ok(SecurityType::SSL),
            _ => Err(format!("Invalid IMAP security: {}", s)),
        }
    }
}

/// Mail account the rules run against. Read-only to the processors.
#[derive(Clone, Serialize, Deserialize)]
pub struct MailAccount {
    pub id: i64,
    pub name: String,
    pub imap_server: String,
    pub imap_port: u16,
    pub imap_security: SecurityType,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Zeroizing<String>,
    #[serde(default = "default_character_set")]
    pub character_set: String,
}

fn default_character_set() -> String {
    "UTF-8".to_string()
}

impl MailAccount {
    pub fn new(
        name: impl Into<String>,
        imap_server: impl Into<String>,
        imap_security: SecurityType,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            imap_server: imap_server.into(),
            imap_port: imap_security.default_imap_port(),
            imap_security,
            username: username.into(),
            password: Zeroizing::new(password.into()),
            character_set: default_character_set(),
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.imap_server.is_empty() {
            errors.push("IMAP server is required".to_string());
        }
        if self.imap_port == 0 {
            errors.push("IMAP port is required".to_string());
        }
        if self.username.is_empty() {
            errors.push("Username is required".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl fmt::Display for MailAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// Never print the password.
impl fmt::Debug for MailAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailAccount")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("imap_server", &self.imap_server)
            .field("imap_port", &self.imap_port)
            .field("imap_security", &self.imap_security)
            .field("username", &self.username)
            .field("character_set", &self.character_set)
            .finish_non_exhaustive()
    }
}
