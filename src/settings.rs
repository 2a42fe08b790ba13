//! Environment configuration

use crate::scheduler::{validate_interval, SchedulerError};
use std::path::PathBuf;

pub const ENV_SCRATCH_DIR: &str = "MAIL_CONSUMER_SCRATCH_DIR";
pub const ENV_DB_PATH: &str = "MAIL_CONSUMER_DB_PATH";
pub const ENV_POLL_MINUTES: &str = "MAIL_CONSUMER_POLL_MINUTES";
pub const ENV_EXTRA_MIME_TYPES: &str = "MAIL_CONSUMER_EXTRA_MIME_TYPES";

const DEFAULT_POLL_MINUTES: u64 = 10;
const DB_FILENAME: &str = "mail-consumer.db";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{name} is not a number: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error(transparent)]
    InvalidInterval(#[from] SchedulerError),

    #[error("Failed to get app directories; set {0} explicitly")]
    NoDataDir(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Where attachments wait for the consumer
    pub scratch_dir: PathBuf,
    pub db_path: PathBuf,
    pub poll_minutes: u64,
    /// Added to the default ingestible mime types
    pub extra_mime_types: Vec<String>,
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let dirs = directories::ProjectDirs::from("com", "mail-consumer", "mail-consumer");

        let scratch_dir = match get(ENV_SCRATCH_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => match &dirs {
                Some(dirs) => dirs.cache_dir().join("scratch"),
                None => std::env::temp_dir().join("mail-consumer"),
            },
        };

        let db_path = match get(ENV_DB_PATH) {
            Some(path) => PathBuf::from(path),
            None => dirs
                .as_ref()
                .map(|dirs| dirs.data_dir().join(DB_FILENAME))
                .ok_or(SettingsError::NoDataDir(ENV_DB_PATH))?,
        };

        let poll_minutes = match get(ENV_POLL_MINUTES) {
            Some(value) => value.parse().map_err(|_| SettingsError::InvalidNumber {
                name: ENV_POLL_MINUTES,
                value: value.clone(),
            })?,
            None => DEFAULT_POLL_MINUTES,
        };
        validate_interval(poll_minutes)?;

        let extra_mime_types = get(ENV_EXTRA_MIME_TYPES)
            .map(|list| {
                list.split(',')
                    .map(|t| t.trim().to_ascii_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            scratch_dir,
            db_path,
            poll_minutes,
            extra_mime_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_explicit_values() {
        let settings = Settings::from_lookup(lookup(&[
            (ENV_SCRATCH_DIR, "/var/lib/mail/scratch"),
            (ENV_DB_PATH, "/var/lib/mail/db.sqlite"),
            (ENV_POLL_MINUTES, " 5 "),
            (ENV_EXTRA_MIME_TYPES, "Application/Zip, ,message/rfc822"),
        ]))
        .unwrap();

        assert_eq!(settings.scratch_dir, PathBuf::from("/var/lib/mail/scratch"));
        assert_eq!(settings.db_path, PathBuf::from("/var/lib/mail/db.sqlite"));
        assert_eq!(settings.poll_minutes, 5);
        assert_eq!(
            settings.extra_mime_types,
            vec!["application/zip", "message/rfc822"]
        );
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[(ENV_DB_PATH, "/tmp/x.db")])).unwrap();
        assert_eq!(settings.poll_minutes, 10);
        assert!(settings.extra_mime_types.is_empty());
        assert!(!settings.scratch_dir.as_os_str().is_empty());
    }

    #[test]
    fn test_invalid_poll_interval() {
        let not_a_number =
            Settings::from_lookup(lookup(&[(ENV_DB_PATH, "/tmp/x.db"), (ENV_POLL_MINUTES, "often")]));
        assert!(matches!(not_a_number, Err(SettingsError::InvalidNumber { .. })));

        let too_long =
            Settings::from_lookup(lookup(&[(ENV_DB_PATH, "/tmp/x.db"), (ENV_POLL_MINUTES, "2000")]));
        assert!(matches!(too_long, Err(SettingsError::InvalidInterval(_))));
    }
}
