//! Console and optional file logging.

use std::path::Path;

use ctrlaw_config::Logging;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::FILE_GUARD;

/// Console filter from `RUST_LOG` when set, otherwise `level`.
fn console_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber: console (pretty or JSON) plus the `[logging]` file,
/// written as JSON lines through a non-blocking appender.
///
/// `base` is the config file's directory; a relative log path resolves against it.
pub fn init(level: &str, json: bool, file: &Logging, base: &Path) -> eyre::Result<()> {
    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter(level))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter(level))
            .boxed()
    };

    let file_layer = match file.file.as_deref() {
        Some(path) => {
            let path = ctrlaw_config::loader::resolve(base, path);
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file {} has no file name", path.display()))?;
            let appender = match file.rotation.as_deref().unwrap_or("never") {
                "daily" => rolling::daily(dir, name),
                "hourly" => rolling::hourly(dir, name),
                "never" => rolling::never(dir, name),
                other => eyre::bail!("logging.rotation must be never|daily|hourly, got {other}"),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let level = file.level.as_deref().unwrap_or("info");
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(EnvFilter::new(level))
                    .boxed(),
            )
        }
        None => None,
    };

    Registry::default()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| eyre::eyre!("installing tracing subscriber: {e}"))
}
