//! Logging setup
//!
//! All modules log through `tracing`. The binary installs one stderr
//! subscriber at startup; the level comes from config unless a CLI flag or
//! `RUST_LOG` says otherwise. Platform client traffic has its own level so
//! request chatter can stay quiet while command logging is verbose.

use crate::config::{LogLevel, LoggingSection};
use tracing_subscriber::EnvFilter;

/// Build the filter directive for the given settings.
///
/// `override_level` (from `--verbose`/`--debug`/`--trace`) raises both the
/// crate and client levels.
pub fn directive(settings: &LoggingSection, override_level: Option<LogLevel>) -> String {
    let level = override_level.unwrap_or(settings.level);
    let client_level = override_level
        .map(|o| o.min(settings.client_level))
        .unwrap_or(settings.client_level);

    format!(
        "{level},taegis_magic={level},taegis_magic::client={client}",
        level = level.as_str(),
        client = client_level.as_str()
    )
}

/// Install the global subscriber. Safe to call more than once.
pub fn init(settings: &LoggingSection, override_level: Option<LogLevel>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(settings, override_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_from_config() {
        let settings = LoggingSection {
            level: LogLevel::Info,
            client_level: LogLevel::Error,
        };
        assert_eq!(
            directive(&settings, None),
            "info,taegis_magic=info,taegis_magic::client=error"
        );
    }

    #[test]
    fn test_override_raises_client_level_too() {
        let settings = LoggingSection::default();
        let d = directive(&settings, Some(LogLevel::Debug));
        assert!(d.starts_with("debug,taegis_magic=debug"));
        assert!(d.ends_with("taegis_magic::client=debug"));
    }

    #[test]
    fn test_override_never_lowers_client_verbosity() {
        let settings = LoggingSection {
            level: LogLevel::Warn,
            client_level: LogLevel::Trace,
        };
        let d = directive(&settings, Some(LogLevel::Info));
        assert!(d.ends_with("taegis_magic::client=trace"));
    }
}
