mod atomic_write;
mod config;
mod data_diff;
mod errors;
mod models;
mod mutations;
mod report;
mod serial_queue;
mod store;

pub use crate::atomic_write::{sibling_path, AtomicWriter};
pub use crate::config::{StoreConfig, BACKUPS_ENV, DATA_DIR_ENV, LOG_DIR_ENV};
pub use crate::data_diff::{compatibility_errors, detect_differences, merge_responses, DataDiff};
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{
    AutoCorrectMask, CommentMap, CommentUpdate, CreateWorkspaceRequest, FormsResponse, ParsedFormsData,
    QuestionIndex, QuestionScoringCriteria, ReimportOutcome, ReimportSummary, ResponseId, ScoreMatrix,
    ScoreUpdate, ScoreValue, ScoringCriterion, UpdateWorkspaceRequest, Workspace, WorkspaceSummary,
};
pub use crate::report::{display_title, student_number, student_scores, QuestionScore, StudentScore};
pub use crate::serial_queue::PathQueue;
pub use crate::store::WorkspaceStore;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Loads config, starts file logging and opens the store.
pub fn bootstrap(config_path: Option<&Path>) -> AppResult<WorkspaceStore> {
    let config = StoreConfig::load(config_path)?;
    init_tracing(&config.log_dir)?;
    let store = WorkspaceStore::open(&config)?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        backups = config.backups,
        "workspace store ready"
    );
    Ok(store)
}

/// JSON logs to a daily rolling `grading.log`; `RUST_LOG` overrides the `info` default.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)
        .map_err(|error| AppError::Io(format!("creating {}: {}", log_dir.display(), error)))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "grading.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
