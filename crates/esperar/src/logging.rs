//! Subscriber setup for binaries and test harnesses.
//!
//! The library itself only emits `tracing` events; nothing is printed until
//! an application installs a subscriber, for example with [`init`].

use tracing_subscriber::EnvFilter;

use crate::result::{EsperarError, EsperarResult};

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

fn filter(default_directive: &str) -> EsperarResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| EsperarError::Config {
            message: format!("invalid log directive '{default_directive}': {e}"),
        }),
    }
}

/// Install a global subscriber.
///
/// `RUST_LOG` wins over `default_directive` when it is set. Fails if a
/// global subscriber is already installed.
pub fn try_init(default_directive: &str, format: LogFormat) -> EsperarResult<()> {
    let filter = filter(default_directive)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| EsperarError::Config {
        message: format!("logging already initialised: {e}"),
    })
}

/// Install a pretty subscriber, ignoring a previous installation
pub fn init(default_directive: &str) {
    if let Err(e) = try_init(default_directive, LogFormat::Pretty) {
        tracing::debug!(error = %e, "subscriber not installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_directive() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(
                filter("esperar=notalevel"),
                Err(EsperarError::Config { .. })
            ));
        }
    }

    #[test]
    fn test_second_init_is_an_error() {
        init("esperar=debug");
        assert!(try_init("esperar=debug", LogFormat::Json).is_err());
    }

    #[test]
    fn test_default_format() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
