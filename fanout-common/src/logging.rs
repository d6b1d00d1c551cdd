use std::str::FromStr;

use tracing::{Level, Span, metadata::LevelFilter};
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Log something we are sending to a remote provider
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Log engine bookkeeping (pool rotation, admission, retries)
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

fn level_from_env() -> LevelFilter {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    std::env::var("LOG_LEVEL").map_or(default, |level| parse_level(&level, default))
}

fn parse_level(level: &str, default: LevelFilter) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or_else(|_| {
        eprintln!("Invalid log level specified {level}, defaulting to {default}");
        default
    })
}

/// Span wrapping one job's dispatch, so every event logged while the job
/// runs carries its id
pub fn job_span(job: impl std::fmt::Display, messages: usize) -> Span {
    tracing::info_span!(target: "fanout", "job", job = %job, messages)
}

/// Our own events pass at any level. The SMTP client is let through for
/// warnings and errors, since those explain failed deliveries.
fn is_emitted(target: &str, level: Level) -> bool {
    target.starts_with("fanout") || (target.starts_with("lettre") && level <= Level::WARN)
}

/// Install the global subscriber.
///
/// The level comes from `LOG_LEVEL`. Events from `fanout*` targets are
/// emitted, plus warnings and errors from the SMTP client.
pub fn init() {
    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level_from_env())
                .with_filter(FilterFn::new(|metadata| {
                    is_emitted(metadata.target(), *metadata.level())
                })),
        )
        .init();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warn", LevelFilter::INFO), LevelFilter::WARN);
        assert_eq!(parse_level("DEBUG", LevelFilter::INFO), LevelFilter::DEBUG);
        assert_eq!(parse_level("loud", LevelFilter::INFO), LevelFilter::INFO);
    }

    #[test]
    fn test_emitted_targets() {
        assert!(is_emitted("fanout_dispatch::pool", Level::TRACE));
        assert!(is_emitted("fanout", Level::INFO));
        assert!(is_emitted("lettre::transport::smtp", Level::WARN));
        assert!(is_emitted("lettre::transport::smtp", Level::ERROR));
        assert!(!is_emitted("lettre::transport::smtp", Level::DEBUG));
        assert!(!is_emitted("tokio::runtime", Level::ERROR));
    }

    #[test]
    fn test_job_span_is_named_for_the_job() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = job_span("01J0000000000000000000000", 3);
            let metadata = span.metadata().unwrap();

            assert_eq!(metadata.name(), "job");
            assert_eq!(metadata.target(), "fanout");
            assert!(metadata.fields().field("job").is_some());
            assert!(metadata.fields().field("messages").is_some());
        });
    }
}
