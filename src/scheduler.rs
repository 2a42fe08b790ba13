//! Mail Scheduler
//!
//! Runs every stored mail account at a fixed interval. The mail pass itself is
//! blocking IMAP I/O, so each run is moved onto Tokio's blocking pool.

use crate::db::Database;
use crate::filters::{process_mail_accounts, MailAccountHandler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::task::JoinHandle;

/// Allowed polling interval, in minutes
pub const MIN_INTERVAL_MINUTES: u64 = 1;
pub const MAX_INTERVAL_MINUTES: u64 = 1440;

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Mail task failed: {0}")]
    Task(String),
}

/// Periodic "process mail accounts" task
#[derive(Clone)]
pub struct MailScheduler {
    db: Arc<Database>,
    handler: Arc<MailAccountHandler>,
    interval_minutes: u64,
    running: Arc<AtomicBool>,
    task_handle: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl MailScheduler {
    pub fn new(db: Arc<Database>, handler: Arc<MailAccountHandler>, interval_minutes: u64) -> Self {
        Self {
            db,
            handler,
            interval_minutes,
            running: Arc::new(AtomicBool::new(false)),
            task_handle: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn interval_minutes(&self) -> u64 {
        self.interval_minutes
    }

    /// Start the background loop. The first pass runs immediately.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(SchedulerError::AlreadyRunning);
        }
        validate_interval(self.interval_minutes)?;

        self.running.store(true, Ordering::Relaxed);

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            scheduler.scheduler_loop().await;
        });
        *self.handle_slot() = Some(handle);

        log::info!(
            "Mail scheduler started (interval: {} minutes)",
            self.interval_minutes
        );
        Ok(())
    }

    pub fn stop(&self) -> Result<(), SchedulerError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(SchedulerError::NotRunning);
        }

        self.running.store(false, Ordering::Relaxed);
        // A pass already on the blocking pool finishes on its own
        if let Some(handle) = self.handle_slot().take() {
            handle.abort();
        }

        log::info!("Mail scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Process every account once. Returns the number of attachments
    /// dispatched.
    pub async fn run_once(&self) -> Result<usize, SchedulerError> {
        let db = self.db.clone();
        let handler = self.handler.clone();

        tokio::task::spawn_blocking(move || process_mail_accounts(&handler, &db))
            .await
            .map_err(|e| SchedulerError::Task(e.to_string()))?
            .map_err(|e| SchedulerError::Database(e.to_string()))
    }

    async fn scheduler_loop(&self) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(60 * self.interval_minutes));

        loop {
            interval.tick().await;

            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            log::debug!("Mail accounts pass triggered by scheduler");
            match self.run_once().await {
                Ok(count) => log::debug!("Mail accounts pass finished: {} attachment(s)", count),
                Err(e) => log::error!("Mail accounts pass failed: {}", e),
            }
        }

        log::info!("Mail scheduler loop exited");
    }

    fn handle_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        // The slot only holds a handle; a poisoned lock leaves it usable
        self.task_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn validate_interval(minutes: u64) -> Result<(), SchedulerError> {
    if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        return Err(SchedulerError::InvalidInterval(format!(
            "Interval must be {}-{} minutes, got {}",
            MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES, minutes
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ChannelDispatcher, SupportedMimeTypes};
    use crate::filters::AttachmentPipeline;
    use crate::mail::ImapConnector;

    fn setup(interval_minutes: u64) -> (MailScheduler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::in_memory().unwrap());
        let (dispatcher, _rx) = ChannelDispatcher::new();
        let pipeline = AttachmentPipeline::new(
            dir.path().to_path_buf(),
            Arc::new(dispatcher),
            Arc::new(SupportedMimeTypes::default()),
            db.clone(),
        );
        let handler = Arc::new(MailAccountHandler::new(Arc::new(ImapConnector), pipeline));
        (MailScheduler::new(db, handler, interval_minutes), dir)
    }

    #[tokio::test]
    async fn test_scheduler_new() {
        let (scheduler, _dir) = setup(10);
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.interval_minutes(), 10);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (scheduler, _dir) = setup(10);

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyRunning)));

        scheduler.stop().unwrap();
        assert!(!scheduler.is_running());
        assert!(matches!(scheduler.stop(), Err(SchedulerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_invalid_interval() {
        for minutes in [0, 1441] {
            let (scheduler, _dir) = setup(minutes);
            assert!(matches!(
                scheduler.start(),
                Err(SchedulerError::InvalidInterval(_))
            ));
            assert!(!scheduler.is_running());
        }
        assert!(validate_interval(1).is_ok());
        assert!(validate_interval(1440).is_ok());
    }

    #[tokio::test]
    async fn test_run_once_without_accounts() {
        let (scheduler, _dir) = setup(10);
        assert_eq!(scheduler.run_once().await.unwrap(), 0);
    }
}
