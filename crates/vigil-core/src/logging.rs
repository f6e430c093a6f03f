//! Global `tracing` subscriber setup.
//!
//! Components log through `tracing` macros with structured fields; a
//! connection's short id travels on its span (`conn = ...`) rather than being
//! baked into message strings.

use tracing_subscriber::EnvFilter;

/// Output format for the subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable compact lines.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Build the level filter. `RUST_LOG` wins over `level` when set.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// Call once at application startup. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init is a no-op if a global subscriber is already set
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Run `f` with a temporary stderr subscriber at `warn`.
///
/// Covers work that happens before the configured level is known, such as
/// loading settings.
pub fn with_bootstrap_subscriber<T>(f: impl FnOnce() -> T) -> T {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter("warn"))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_twice_does_not_panic() {
        init_subscriber("warn", LogFormat::Compact);
        init_subscriber("debug", LogFormat::Json);
    }

    #[test]
    fn bootstrap_subscriber_returns_result() {
        let value = with_bootstrap_subscriber(|| {
            tracing::warn!("before settings are loaded");
            42
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn default_format_is_compact() {
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }

    #[test]
    fn env_filter_accepts_directives() {
        let filter = env_filter("vigil_server=debug,info");
        assert!(!filter.to_string().is_empty());
    }
}
