//! Tracing subscriber setup

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber
///
/// `RUST_LOG` wins over `level`. Log lines go to stderr, and also to
/// `log_file` when one is configured; keep the returned guard alive until
/// exit so buffered lines are flushed.
pub fn init(level: &str, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_logs = fmt::Layer::new().with_target(false).with_writer(std::io::stderr);

    let file = log_file.and_then(|path| {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        path.file_name().map(|name| (dir.to_path_buf(), name.to_owned()))
    });

    match file {
        Some((dir, name)) => {
            let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let file_logs = fmt::Layer::new()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer);
            let _ = tracing_subscriber::registry()
                .with(filter())
                .with(stderr_logs)
                .with(file_logs)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry().with(filter()).with(stderr_logs).try_init();
            None
        }
    }
}
