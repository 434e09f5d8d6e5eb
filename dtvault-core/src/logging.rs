//! Logging setup and per-session spans
//!
//! Every relay or thumbnail session runs inside its own span carrying a
//! random session id and the video it serves. Spans are logged when they
//! close, after the session recorded how many bytes reached the client, so
//! one line per session is enough to follow traffic.

use std::sync::Arc;

use tracing::{field, info_span, Level, Span};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Directives appended to the configured level. The gRPC transport logs
/// every frame at debug.
const TRANSPORT_DIRECTIVES: &str = "h2=warn,hyper=warn,hyper_util=warn,tower=warn";

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` replaces the configured level and the transport directives
/// when it is set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(&config.level)?,
    };
    let writer = make_writer(config.file_path.as_deref())?;
    let registry = tracing_subscriber::registry().with(env_filter);

    if config.format.as_str() == "json" {
        let json_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_writer(writer);
        registry.with(json_layer).try_init()?;
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(false)
            .with_file(false)
            .with_writer(writer);
        registry.with(pretty_layer).try_init()?;
    }

    Ok(())
}

fn default_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let level = parse_log_level(level)?;
    Ok(EnvFilter::try_new(format!(
        "{},{TRANSPORT_DIRECTIVES}",
        level.to_string().to_lowercase()
    ))?)
}

fn make_writer(file_path: Option<&str>) -> anyhow::Result<BoxMakeWriter> {
    Ok(match file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    })
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

/// Random id attached to the span of one relay or thumbnail session
#[must_use]
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Span of one `/stream` session. `bytes_written` is recorded when the
/// session ends.
#[must_use]
pub fn relay_span(video_id: &str, preset_id: Option<&str>) -> Span {
    info_span!(
        "relay_session",
        session_id = %generate_session_id(),
        video_id = %video_id,
        preset_id = preset_id.unwrap_or(""),
        bytes_written = field::Empty,
    )
}

/// Span of one thumbnail bridge. `bytes_written` holds the image size.
#[must_use]
pub fn thumbnail_span(video_id: &str) -> Span {
    info_span!(
        "thumbnail_session",
        session_id = %generate_session_id(),
        video_id = %video_id,
        bytes_written = field::Empty,
    )
}
