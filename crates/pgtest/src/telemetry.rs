//! Opt-in tracing output for test suites.
//!
//! The library only emits events; nothing is printed until a subscriber is
//! installed. Suites that want lifecycle logs call [`initialise`] once, usually
//! from a shared fixture. Output goes through libtest's capture, so a passing
//! test stays quiet and a failing one shows the cluster's startup and teardown
//! next to its assertion message. Run with `--nocapture` to see everything.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use pgtest_config::{LogFormat, Settings};
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

/// Set once the process-wide subscriber is in place.
static INSTALLED: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber described by `settings` on first call.
///
/// Later calls return a fresh handle without touching global state, so every
/// test may call this freely.
///
/// # Errors
///
/// [`TelemetryError::Filter`] for an unparsable filter, and
/// [`TelemetryError::Subscriber`] when another subscriber was installed
/// outside this function.
///
/// ```no_run
/// use pgtest::{Settings, telemetry};
///
/// let settings = Settings::from_environment().unwrap_or_default();
/// telemetry::initialise(&settings)?;
/// # Ok::<(), pgtest::telemetry::TelemetryError>(())
/// ```
pub fn initialise(settings: &Settings) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install_subscriber(settings))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(settings: &Settings) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(settings.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    tracing::subscriber::set_global_default(suite_subscriber(filter, settings.log_format()))
        .map_err(TelemetryError::Subscriber)
}

/// Builds the subscriber used for test output.
///
/// Thread names are kept because libtest names each thread after its test,
/// which attributes interleaved cluster events to the test that owns them.
fn suite_subscriber(filter: EnvFilter, format: LogFormat) -> Box<dyn Subscriber + Send + Sync> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_test_writer()
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());
    match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    }
}

#[cfg(test)]
mod tests {
    #![expect(
        clippy::expect_used,
        reason = "test code uses expect for clarity and assertions"
    )]

    use super::*;

    #[test]
    fn rejects_unparsable_filters() {
        let settings = Settings {
            log_filter: Some("pgtest=loud".to_owned()),
            ..Settings::default()
        };

        let error = install_subscriber(&settings).expect_err("filter must be rejected");

        assert!(matches!(error, TelemetryError::Filter(_)), "{error}");
    }

    #[test]
    fn repeated_initialisation_is_idempotent() {
        let settings = Settings::default();

        initialise(&settings).expect("first initialisation");
        initialise(&settings).expect("second initialisation");
    }
}
