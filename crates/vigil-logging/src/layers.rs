//! Formatting layers shared by console and file output

use tracing::Subscriber;
use tracing_subscriber::fmt::{
    self, MakeWriter,
    format::{Format, Json, JsonFields},
};
use tracing_subscriber::registry::LookupSpan;

use crate::config::JsonlConfig;

/// Create a JSONL formatting layer writing to `writer`
///
/// Configures tracing-subscriber's JSON formatter with the settings used for
/// log aggregation.
pub fn jsonl_layer<S, W>(writer: W, config: &JsonlConfig) -> fmt::Layer<S, JsonFields, Format<Json>, W>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_writer(writer)
}
