pub mod aggregate;
pub mod autosave;
pub mod chart;
pub mod columns;
pub mod datasource;
pub mod dates;
pub mod db;
pub mod errors;
pub mod filter;
pub mod formula;
pub mod layout;
pub mod models;
pub mod pipeline;
pub mod sort;
pub mod store;
pub mod values;

pub use crate::autosave::{AutosaveCoordinator, DocumentStore, TimerPhase};
pub use crate::datasource::{ColumnSource, FeedState, LayeredRowSource, RowSource, WidgetFeed};
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{Dashboard, DashboardSettings, SaveStatus, Widget, WidgetKind, PLACEHOLDER};
pub use crate::pipeline::{compute_view, ViewContext, WidgetView};
pub use crate::store::{Action, DashboardStore};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON logs to a daily-rolling file under `log_dir`, filtered by `RUST_LOG`
/// (default `info`). Safe to call more than once; later calls are no-ops.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "canvas.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return Ok(());
    }

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
