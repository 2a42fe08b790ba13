//! Mail consumer
//!
//! Polls IMAP accounts, applies per-account mail rules and hands matching
//! attachments to the document consumer.

pub mod consumer;
pub mod db;
pub mod filters;
pub mod mail;
pub mod scheduler;
pub mod settings;

use consumer::{ChannelDispatcher, SupportedMimeTypes};
use db::Database;
use filters::{AttachmentPipeline, MailAccountHandler};
use mail::ImapConnector;
use scheduler::MailScheduler;
use settings::Settings;
use std::sync::Arc;

fn fatal(message: &str) -> ! {
    log::error!("{}", message);
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

pub fn run() {
    // Load .env file for local configuration
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => fatal(&format!("Invalid configuration: {}", e)),
    };

    if let Some(parent) = settings.db_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            fatal(&format!("Failed to create data directory {:?}: {}", parent, e));
        }
    }
    log::info!("Database path: {:?}", settings.db_path);
    log::info!("Scratch directory: {:?}", settings.scratch_dir);

    let db = match Database::new(settings.db_path.clone()) {
        Ok(db) => Arc::new(db),
        Err(e) => fatal(&format!("Database initialization failed: {}", e)),
    };

    let (dispatcher, mut tasks) = ChannelDispatcher::new();
    let pipeline = AttachmentPipeline::new(
        settings.scratch_dir.clone(),
        Arc::new(dispatcher),
        Arc::new(SupportedMimeTypes::with_extra(&settings.extra_mime_types)),
        db.clone(),
    );
    let handler = Arc::new(MailAccountHandler::new(Arc::new(ImapConnector), pipeline));
    let scheduler = MailScheduler::new(db, handler, settings.poll_minutes);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => fatal(&format!("Failed to start async runtime: {}", e)),
    };

    runtime.block_on(async move {
        if let Err(e) = scheduler.start() {
            fatal(&format!("Failed to start mail scheduler: {}", e));
        }

        loop {
            tokio::select! {
                task = tasks.recv() => match task {
                    Some(task) => log::info!(
                        "Consume task {} queued: {} ({:?})",
                        task.id,
                        task.request.task_name,
                        task.request.path
                    ),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Shutdown requested");
                    break;
                }
            }
        }

        if let Err(e) = scheduler.stop() {
            log::debug!("{}", e);
        }
    });
}
