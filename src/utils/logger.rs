//! Logging setup
//!
//! Console logging through `tracing`, filtered to this crate. `RUST_LOG`
//! overrides the level chosen on the command line.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Log level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Level from `-v` occurrences; `quiet` wins
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => LogLevel::Error,
            (false, 0) => LogLevel::Info,
            (false, 1) => LogLevel::Debug,
            (false, _) => LogLevel::Trace,
        }
    }

    /// Command-line flags win over a configured level name
    pub fn select(verbose: u8, quiet: bool, configured: Option<&str>) -> Self {
        if verbose > 0 || quiet {
            return Self::from_verbosity(verbose, quiet);
        }
        configured
            .and_then(Self::from_str)
            .unwrap_or(LogLevel::Info)
    }
}

fn filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("testrun={}", level.to_tracing_level())))
}

/// Install the global subscriber. CI logs carry no ANSI colors.
pub fn init_logger(level: LogLevel, ci: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .with_ansi(!ci)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from_str("info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("unknown"), None);
    }

    #[test]
    fn test_from_verbosity() {
        assert_eq!(LogLevel::from_verbosity(0, false), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(1, false), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(3, false), LogLevel::Trace);
        assert_eq!(LogLevel::from_verbosity(2, true), LogLevel::Error);
    }

    #[test]
    fn test_select_prefers_flags() {
        assert_eq!(LogLevel::select(0, false, Some("warn")), LogLevel::Warn);
        assert_eq!(LogLevel::select(1, false, Some("warn")), LogLevel::Debug);
        assert_eq!(LogLevel::select(0, true, Some("trace")), LogLevel::Error);
        assert_eq!(LogLevel::select(0, false, Some("loud")), LogLevel::Info);
        assert_eq!(LogLevel::select(0, false, None), LogLevel::Info);
    }
}
