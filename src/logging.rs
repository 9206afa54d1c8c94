//! Tracing subscriber setup.
//!
//! Logs always go to stderr so that `fcip serve` keeps stdout for protocol
//! lines. The filter comes from `FCIP_LOG`, then `RUST_LOG`, then the
//! configured level (`debug` with `--verbose`).

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::fcip_config::{LogFormat, LoggingSection};

/// Filter directive to use, before parsing.
pub fn filter_directive<F>(section: &LoggingSection, verbose: bool, var: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    var("FCIP_LOG")
        .or_else(|| var("RUST_LOG"))
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| {
            if verbose {
                "debug".to_string()
            } else {
                section.level.clone()
            }
        })
}

/// Install the global subscriber.
///
/// The returned guard flushes the log file on drop and must be held for the
/// life of the process.
pub fn init(section: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let directive = filter_directive(section, verbose, |key| std::env::var(key).ok());
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter '{}'", directive))?;

    let (file_writer, guard) = match &section.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .context("Log file path has no file name")?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match (section.format, file_writer) {
        (LogFormat::Pretty, None) => builder.with_writer(std::io::stderr).try_init(),
        (LogFormat::Json, None) => builder.json().with_writer(std::io::stderr).try_init(),
        (LogFormat::Pretty, Some(file)) => builder
            .with_ansi(false)
            .with_writer(std::io::stderr.and(file))
            .try_init(),
        (LogFormat::Json, Some(file)) => builder
            .json()
            .with_writer(std::io::stderr.and(file))
            .try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;
    Ok(guard)
}
