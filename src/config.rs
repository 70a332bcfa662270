//! Store configuration loaded from the environment.
//!
//! Every setting is bound to its environment variables through the static
//! [`ENV_BINDINGS`] table. Names are tried in order, so the first name is
//! canonical and later ones are legacy aliases.

use crate::campaign::adapters::{DEFAULT_PATCH_SET_TTL, postgres::CampaignPgPool};
use chrono::TimeDelta;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Pool size used when no limit is configured.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// How long a pool checkout waits when no timeout is configured.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// A configurable store setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    /// `PostgreSQL` connection URL.
    DatabaseUrl,
    /// Maximum number of pooled connections.
    MaxConnections,
    /// Pool checkout timeout in seconds.
    ConnectionTimeout,
    /// Patch set time-to-live in seconds.
    PatchSetTtl,
}

impl Setting {
    const ALL: [Self; 4] = [
        Self::DatabaseUrl,
        Self::MaxConnections,
        Self::ConnectionTimeout,
        Self::PatchSetTtl,
    ];
}

/// Environment variables feeding one setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvBinding {
    /// Setting the variables feed.
    pub setting: Setting,
    /// Variable names, canonical first.
    pub names: &'static [&'static str],
    /// Whether loading fails when no variable is set.
    pub required: bool,
}

impl EnvBinding {
    /// Returns the canonical variable name.
    #[must_use]
    pub fn canonical(&self) -> &'static str {
        self.names.first().copied().unwrap_or_default()
    }
}

/// Environment variables read by [`StoreConfig::from_env`].
pub static ENV_BINDINGS: &[EnvBinding] = &[
    EnvBinding {
        setting: Setting::DatabaseUrl,
        names: &["HAUSSMANN_DATABASE_URL", "DATABASE_URL"],
        required: true,
    },
    EnvBinding {
        setting: Setting::MaxConnections,
        names: &["HAUSSMANN_DB_MAX_CONNECTIONS", "PGMAXCONNS"],
        required: false,
    },
    EnvBinding {
        setting: Setting::ConnectionTimeout,
        names: &["HAUSSMANN_DB_CONNECTION_TIMEOUT_SECS"],
        required: false,
    },
    EnvBinding {
        setting: Setting::PatchSetTtl,
        names: &["HAUSSMANN_PATCH_SET_TTL_SECS"],
        required: false,
    },
];

/// Errors raised while loading configuration or building the pool.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable holds a value the setting cannot use.
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        /// Variable that supplied the value.
        var: &'static str,
        /// Rejected value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The binding table does not bind every setting exactly once.
    #[error("invalid environment binding table: {0}")]
    Bindings(String),

    /// The connection pool could not be created.
    #[error("failed to build connection pool: {0}")]
    Pool(#[from] PoolError),
}

fn invalid(var: &'static str, value: &str, reason: impl fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_owned(),
        reason: reason.to_string(),
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|err| invalid(var, value, err))
}

/// Checks that `bindings` binds every [`Setting`] exactly once, that every
/// binding names at least one variable, and that no variable is reused.
///
/// # Errors
///
/// Returns [`ConfigError::Bindings`] describing the first problem found.
pub fn validate_bindings(bindings: &[EnvBinding]) -> Result<(), ConfigError> {
    let mut settings = HashSet::new();
    let mut names = HashSet::new();
    for binding in bindings {
        if binding.names.is_empty() {
            return Err(ConfigError::Bindings(format!(
                "{:?} has no variable names",
                binding.setting
            )));
        }
        if !settings.insert(binding.setting) {
            return Err(ConfigError::Bindings(format!(
                "{:?} is bound twice",
                binding.setting
            )));
        }
        if let Some(name) = binding.names.iter().find(|name| !names.insert(**name)) {
            return Err(ConfigError::Bindings(format!("{name} is used twice")));
        }
    }
    match Setting::ALL.iter().find(|setting| !settings.contains(*setting)) {
        Some(unbound) => Err(ConfigError::Bindings(format!("{unbound:?} is not bound"))),
        None => Ok(()),
    }
}

/// Connection and retention settings of a campaign store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// `PostgreSQL` connection URL.
    pub database_url: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// How long a pool checkout may wait.
    pub connection_timeout: Duration,
    /// Age after which unattached patch sets expire.
    pub patch_set_ttl: TimeDelta,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database_url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("connection_timeout", &self.connection_timeout)
            .field("patch_set_ttl", &self.patch_set_ttl)
            .finish()
    }
}

impl StoreConfig {
    /// Creates a configuration with default pool and retention settings.
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            patch_set_ttl: DEFAULT_PATCH_SET_TTL,
        }
    }

    /// Loads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// See [`StoreConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when the database URL is not set,
    /// [`ConfigError::Invalid`] when a value cannot be used, and
    /// [`ConfigError::Bindings`] when the binding table is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        validate_bindings(ENV_BINDINGS)?;
        let mut config = Self::new(String::new());
        for binding in ENV_BINDINGS {
            let found = binding
                .names
                .iter()
                .find_map(|name| lookup(name).map(|value| (*name, value)));
            match found {
                Some((var, value)) => config.apply(binding.setting, var, value)?,
                None if binding.required => return Err(ConfigError::Missing(binding.canonical())),
                None => {}
            }
        }
        Ok(config)
    }

    fn apply(
        &mut self,
        setting: Setting,
        var: &'static str,
        value: String,
    ) -> Result<(), ConfigError> {
        match setting {
            Setting::DatabaseUrl => {
                if value.trim().is_empty() {
                    return Err(invalid(var, &value, "must not be empty"));
                }
                self.database_url = value;
            }
            Setting::MaxConnections => {
                let max: u32 = parse(var, &value)?;
                if max == 0 {
                    return Err(invalid(var, &value, "must be at least 1"));
                }
                self.max_connections = max;
            }
            Setting::ConnectionTimeout => {
                self.connection_timeout = Duration::from_secs(parse(var, &value)?);
            }
            Setting::PatchSetTtl => {
                let secs: i64 = parse(var, &value)?;
                self.patch_set_ttl = TimeDelta::try_seconds(secs)
                    .filter(|ttl| *ttl > TimeDelta::zero())
                    .ok_or_else(|| invalid(var, &value, "must be a positive number of seconds"))?;
            }
        }
        Ok(())
    }

    /// Builds the connection pool described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Pool`] when the pool cannot open its initial
    /// connections.
    pub fn build_pool(&self) -> Result<CampaignPgPool, ConfigError> {
        let manager = ConnectionManager::<PgConnection>::new(&self.database_url);
        let pool = Pool::builder()
            .max_size(self.max_connections)
            .connection_timeout(self.connection_timeout)
            .build(manager)?;
        Ok(pool)
    }
}
