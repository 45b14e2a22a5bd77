use std::io::{self, Stdout};

use tracing_subscriber::{fmt, layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Builds the stdout layer. The concrete formatter type is erased so
/// json/pretty/compact can be chosen at runtime.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stdout = io::stdout;
    let console = &config.console;

    let base = fmt::layer()
        .with_writer(writer)
        .with_target(console.with_target)
        .with_thread_ids(console.with_thread_ids);

    match console.format {
        LogFormat::Json => base.json().with_current_span(true).boxed(),
        LogFormat::Pretty => base.pretty().with_ansi(console.with_ansi).boxed(),
        LogFormat::Compact => base.compact().with_ansi(console.with_ansi).boxed(),
    }
}
