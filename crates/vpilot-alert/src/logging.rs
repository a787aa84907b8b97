//! Logging setup for `vpalert`.
//!
//! Everything logs through `tracing`. Output goes to stderr because the
//! bridges speak their line protocol on stdout, and a stray log line there
//! would reach the simulator shim.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How chatty the binary is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Alarms, registrations and dropped failures.
    #[default]
    Normal,
    /// Every poll tick and dispatch decision.
    Verbose,
    /// Everything, including HTTP client internals.
    Trace,
}

impl Verbosity {
    /// Level used for this crate's own events.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter directives used when `RUST_LOG` is not set.
    ///
    /// The HTTP stack stays at `warn` unless tracing everything.
    #[must_use]
    pub fn directives(self) -> String {
        let own = format!("vpilot_alert={}", self.level());
        match self {
            Self::Trace => format!("{own},reqwest=trace,hyper_util=debug"),
            _ => format!("{own},reqwest=warn,hyper_util=warn"),
        }
    }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins over `verbosity`. Only the first call installs anything.
///
/// # Examples
///
/// ```no_run
/// use vpilot_alert::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity >= Verbosity::Verbose)
        .with_thread_names(verbosity == Verbosity::Trace);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(Verbosity::Quiet.level(), Level::ERROR);
        assert_eq!(Verbosity::Normal.level(), Level::INFO);
        assert_eq!(Verbosity::Verbose.level(), Level::DEBUG);
        assert_eq!(Verbosity::Trace.level(), Level::TRACE);
    }

    #[test]
    fn test_default_is_normal() {
        assert_eq!(Verbosity::default(), Verbosity::Normal);
    }

    #[test]
    fn test_directives_quiet_http_stack() {
        assert_eq!(
            Verbosity::Normal.directives(),
            "vpilot_alert=INFO,reqwest=warn,hyper_util=warn"
        );
        assert!(Verbosity::Trace.directives().contains("reqwest=trace"));
    }

    #[test]
    fn test_directives_parse() {
        for verbosity in [
            Verbosity::Quiet,
            Verbosity::Normal,
            Verbosity::Verbose,
            Verbosity::Trace,
        ] {
            assert!(EnvFilter::try_new(verbosity.directives()).is_ok());
        }
    }

    #[test]
    fn test_ordering() {
        assert!(Verbosity::Quiet < Verbosity::Normal);
        assert!(Verbosity::Verbose < Verbosity::Trace);
        assert!(Verbosity::Trace >= Verbosity::Verbose);
        assert!(Verbosity::Normal < Verbosity::Verbose);
    }

    #[test]
    fn test_ordering_follows_level_detail() {
        // More verbose means a more detailed level
        let all = [
            Verbosity::Quiet,
            Verbosity::Normal,
            Verbosity::Verbose,
            Verbosity::Trace,
        ];
        for pair in all.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].level() < pair[1].level());
        }
    }

    #[test]
    fn test_init_logging_twice() {
        // Only the first call installs a subscriber
        init_logging(Verbosity::Quiet);
        init_logging(Verbosity::Trace);
    }
}
