use std::io;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, SimError};

const LOG_FILE: &str = "sim.log";

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Installs stderr and `<root>/log/sim.log` output. Keep the guard alive for
/// as long as file output should be flushed.
pub fn init(root: &Path) -> Result<WorkerGuard> {
    if INSTALLED.get().is_some() {
        return Ok(tracing_appender::non_blocking(io::sink()).1);
    }
    let log_dir = root.join("log");
    std::fs::create_dir_all(&log_dir).map_err(|err| SimError::io(&log_dir, err))?;

    let appender = tracing_appender::rolling::never(&log_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .try_init()
        .map_err(|err| SimError::Logging(err.to_string()))?;
    let _ = INSTALLED.set(());
    tracing::debug!(dir = %log_dir.display(), "logging initialised");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let root = std::env::temp_dir().join(format!("mapsim-log-{}", std::process::id()));
        let first = init(&root);
        let second = init(&root);
        // fails when some other subscriber is already global
        if first.is_ok() {
            assert!(second.is_ok());
            assert!(root.join("log").is_dir());
        }
        let _ = std::fs::remove_dir_all(&root);
    }
}
