//! Structured Logging
//!
//! - `LOG_FORMAT=json`: one JSON object per event, for log aggregation
//! - anything else: human-readable text
//! - `RUST_LOG`: level filter, defaults to `info`
//!   (e.g. `RUST_LOG=pt_platform=debug,sqlx=warn`)
//!
//! ```rust,ignore
//! pt_common::logging::init_logging("pt-api");
//! tracing::info!(entity_type = "Role", "Entity created");
//! ```

use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const DEFAULT_FILTER: &str = "info,sqlx=warn,lapin=warn";

/// Output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Install the global subscriber for a service.
///
/// Calling it twice is harmless: the second install is ignored.
pub fn init_logging(service_name: &str) {
    let format = LogFormat::from_env();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .flatten_event(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .try_init(),
    };

    if installed.is_ok() {
        info!(service = service_name, format = ?format, "Logging initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let filter = EnvFilter::try_new(DEFAULT_FILTER);
        assert!(filter.is_ok());
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init_logging("test");
        init_logging("test");
    }
}
