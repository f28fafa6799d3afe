use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Parse a level name (trace, debug, info, warn, error), defaulting to info.
pub fn parse_level(log_level: &str) -> Level {
    match log_level.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!("invalid log level '{}', using 'info'", log_level);
            Level::INFO
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `log_level` when it is set. Calling this twice is
/// harmless: the second subscriber is simply not installed.
///
/// ```rust,no_run
/// sipd::logging::initialize_logging("debug");
/// ```
pub fn initialize_logging(log_level: &str) {
    let level = parse_level(log_level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}
