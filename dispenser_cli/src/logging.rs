//! tracing subscriber setup: console on stderr (pretty or JSON) plus an
//! optional JSON-lines file sink from `[logging]`.

use std::path::Path;

use dispenser_config::Logging;
use eyre::WrapErr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use tracing_appender::non_blocking::WorkerGuard;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. The returned guard flushes the file sink
/// when dropped; hold it until the process is done logging.
pub fn init(
    json: bool,
    console_level: &str,
    file_cfg: &Logging,
) -> eyre::Result<Option<WorkerGuard>> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(console_level)
            .wrap_err_with(|| format!("invalid --log-level {console_level:?}"))?,
    };

    let console: BoxedLayer = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let mut layers: Vec<BoxedLayer> = vec![console];
    let mut guard = None;
    if let Some(path) = file_cfg.file.as_deref() {
        let (layer, g) = file_layer(Path::new(path), file_cfg)?;
        layers.push(layer);
        guard = Some(g);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(guard)
}

fn file_layer(path: &Path, cfg: &Logging) -> eyre::Result<(BoxedLayer, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| eyre::eyre!("logging.file {path:?} has no file name"))?;
    std::fs::create_dir_all(dir).wrap_err_with(|| format!("create log directory {dir:?}"))?;

    let appender = match cfg.rotation.as_deref().unwrap_or("never") {
        "daily" => tracing_appender::rolling::daily(dir, name),
        "hourly" => tracing_appender::rolling::hourly(dir, name),
        _ => tracing_appender::rolling::never(dir, name),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let level = cfg.level.as_deref().unwrap_or("info");
    let filter =
        EnvFilter::try_new(level).wrap_err_with(|| format!("invalid logging.level {level:?}"))?;
    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter)
        .boxed();
    Ok((layer, guard))
}
