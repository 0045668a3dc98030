//! Environment layering for `Settings::from_environment`.

#![expect(
    clippy::expect_used,
    reason = "test code uses expect for clarity and assertions"
)]

use std::ffi::{OsStr, OsString};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use once_cell::sync::Lazy;
use pgtest_config::{DEFAULT_SUPERUSER, LogFormat, Settings};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    entries: Vec<(&'static str, Option<OsString>)>,
    guard: Option<MutexGuard<'static, ()>>,
}

impl EnvOverride {
    fn new() -> Self {
        let guard = ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            entries: Vec::new(),
            guard: Some(guard),
        }
    }

    fn set(&mut self, key: &'static str, value: &str) {
        let previous = std::env::var_os(key);
        // Environment mutation is `unsafe` in edition 2024; the guard restores
        // the previous value in `Drop`.
        unsafe { std::env::set_var(key, OsStr::new(value)) };
        self.entries.push((key, previous));
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        for (key, previous) in self.entries.drain(..).rev() {
            match previous {
                Some(value) => unsafe { std::env::set_var(key, value) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
        drop(self.guard.take());
    }
}

#[test]
fn environment_variables_populate_settings() {
    let mut env = EnvOverride::new();
    env.set("PGTEST_PORT", "54329");
    env.set("PGTEST_SUPERUSER", "fixture_owner");
    env.set("PGTEST_STARTUP_TIMEOUT_MS", "1500");
    env.set("PGTEST_LOG_FORMAT", "json");

    let settings = Settings::from_environment().expect("settings should load");

    assert_eq!(settings.port, Some(54329));
    assert_eq!(settings.superuser(), "fixture_owner");
    assert_eq!(settings.startup_timeout(), Duration::from_millis(1500));
    assert_eq!(settings.log_format(), LogFormat::Json);
}

#[test]
fn harness_arguments_are_not_parsed() {
    let _env = EnvOverride::new();
    // `cargo test -- --nocapture` leaves unknown flags in argv; loading must
    // ignore them entirely.
    let settings = Settings::from_environment().expect("settings should load");
    assert_eq!(settings.superuser(), DEFAULT_SUPERUSER);
}
