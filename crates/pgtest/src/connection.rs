//! Connection parameters handed to database clients.

use std::collections::BTreeMap;
use std::fmt;

use pgtest_config::defaults::{DEFAULT_DATABASE, DEFAULT_HOST};
use serde::Serialize;

/// How to reach a running test cluster.
///
/// Obtained from [`crate::TestCluster::connection`]; the cluster never opens
/// a connection itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDescriptor {
    user: String,
    host: String,
    port: u16,
    database: String,
}

impl ConnectionDescriptor {
    pub(crate) fn new(user: impl Into<String>, port: u16) -> Self {
        Self {
            user: user.into(),
            host: DEFAULT_HOST.to_owned(),
            port,
            database: DEFAULT_DATABASE.to_owned(),
        }
    }

    /// Superuser name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Always `localhost`.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Always `postgres`.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// URL form: `postgresql://<user>@localhost:<port>/postgres`.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }

    /// Key/value form with the keys `user`, `host`, `port` and `database`.
    #[must_use]
    pub fn params(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("user", self.user.clone()),
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
            ("database", self.database.clone()),
        ])
    }

    /// libpq keyword/value form, accepted by most client libraries.
    #[must_use]
    pub fn keyword_string(&self) -> String {
        format!(
            "host={} port={} user={} dbname={}",
            self.host, self.port, self.user, self.database
        )
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}
