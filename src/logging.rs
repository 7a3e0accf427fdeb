use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn filter_directive(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "dayflow=debug"
    } else if quiet {
        "dayflow=error"
    } else {
        "dayflow=info"
    }
}

/// Initialize logging based on output mode and debug flag
///
/// With a log file, events are also written there as JSON lines through a
/// non-blocking writer; keep the returned guard alive until exit so the
/// writer flushes.
pub fn init_logging(
    debug: bool,
    quiet: bool,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_env("DAYFLOW_LOG")
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(debug, quiet)));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(debug)
        .with_file(debug)
        .with_writer(std::io::stderr);

    let Some(log_path) = log_file else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
        return Ok(None);
    };

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(writer)
        .with_target(true)
        .with_current_span(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()?;

    Ok(Some(guard))
}

/// Default log file for a run of `workflow_name`
pub fn default_log_path(workflow_name: &str) -> anyhow::Result<PathBuf> {
    let log_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("dayflow")
        .join("logs");

    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    Ok(log_dir.join(format!("{}-{}.log", workflow_name, timestamp)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(true, true), "dayflow=debug");
        assert_eq!(filter_directive(false, true), "dayflow=error");
        assert_eq!(filter_directive(false, false), "dayflow=info");
    }

    #[test]
    fn test_default_log_path() {
        if let Ok(path) = default_log_path("daily-analysis") {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("daily-analysis-"));
            assert!(name.ends_with(".log"));
            assert!(path.to_string_lossy().contains("dayflow"));
        }
    }
}
