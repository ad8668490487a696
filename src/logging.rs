//! Process logging.
//!
//! `RUST_LOG` controls the filter (default `adw=info`, `adw=debug` with
//! `--verbose`). Console output goes to stderr as text or JSON lines. Long
//! running commands also get a daily-rolling `adw.log` under the state
//! directory; the returned guard must live until exit so buffered lines are
//! flushed.

use std::path::Path;

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub const LOG_FILE_PREFIX: &str = "adw.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "adw=debug" } else { "adw=info" })
    })
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(format: LogFormat, verbose: bool) -> BoxedLayer {
    let filter = default_filter(verbose);
    match format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(false)
            .with_filter(filter)
            .boxed(),
    }
}

/// Install the global subscriber. Returns the file writer guard when
/// `file_dir` is given. Calling this twice is harmless; the second call
/// keeps the first subscriber.
pub fn init(verbose: bool, format: LogFormat, file_dir: Option<&Path>) -> Option<WorkerGuard> {
    let mut layers: Vec<BoxedLayer> = vec![console_layer(format, verbose)];

    let guard = file_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .with_filter(default_filter(verbose))
                .boxed(),
        );
        Some(guard)
    });

    let _ = tracing_subscriber::registry().with(layers).try_init();
    guard
}
