pub mod cache;
pub mod core;
pub mod editor;
pub mod errors;
pub mod layout;
pub mod models;
pub mod remote;
pub mod sync;
pub mod workspace;

pub use crate::cache::DocumentCache;
pub use crate::core::WorkspaceCore;
pub use crate::editor::EditorCapability;
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{
    ConfigSnapshot, ContainerSize, Document, DocumentKind, DocumentSummary, OpenDocument,
    RetryPolicy, WindowState, WindowStateUpdate, WorkspaceOptions,
};
pub use crate::remote::RemoteStore;
pub use crate::sync::Synchronizer;
pub use crate::workspace::{DocumentWorkspace, WorkspaceEffect};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Routes tracing output to a daily-rolling json log file under
/// `<data_dir>/logs`. Honors `RUST_LOG`; defaults to `info`.
pub fn init_tracing(data_dir: &Path) -> Result<(), String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "workspace.log");
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
        .map_err(|error| error.to_string())
}
