use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SqlRuntimeError;

/// Shape of the field descriptor lists requested at prepare time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorMode {
    /// Descriptors exactly as the library reports them.
    Fixed,
    /// Narrow numeric and fixed text columns widened to double / varying text.
    #[default]
    Normalized,
}

/// Options for attaching to (or creating) a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Page size used by `create_database`.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub descriptor_mode: DescriptorMode,
}

fn default_page_size() -> u32 {
    4096
}

impl ConnectionOptions {
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3050,
            database: database.into(),
            user: "SYSDBA".into(),
            password: String::new(),
            role: None,
            page_size: default_page_size(),
            descriptor_mode: DescriptorMode::default(),
        }
    }

    #[must_use]
    pub fn builder(database: impl Into<String>) -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::new(database)
    }

    /// Parse options from a JSON document.
    ///
    /// # Errors
    /// Returns `SqlRuntimeError::ConfigError` if the document is malformed or the
    /// database path is empty.
    pub fn from_json(json: &str) -> Result<Self, SqlRuntimeError> {
        let opts: ConnectionOptions = serde_json::from_str(json)?;
        opts.validate()?;
        Ok(opts)
    }

    /// # Errors
    /// Returns `SqlRuntimeError::ConfigError` when the options cannot identify a database.
    pub fn validate(&self) -> Result<(), SqlRuntimeError> {
        if self.database.trim().is_empty() {
            return Err(SqlRuntimeError::ConfigError(
                "database path must not be empty".into(),
            ));
        }
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(SqlRuntimeError::ConfigError(format!(
                "page size {} is not a power of two",
                self.page_size
            )));
        }
        Ok(())
    }
}

/// Fluent builder for [`ConnectionOptions`].
#[derive(Debug, Clone)]
pub struct ConnectionOptionsBuilder {
    opts: ConnectionOptions,
}

impl ConnectionOptionsBuilder {
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            opts: ConnectionOptions::new(database),
        }
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.opts.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.opts.port = port;
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.opts.user = user.into();
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.opts.password = password.into();
        self
    }

    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.opts.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.opts.page_size = page_size;
        self
    }

    #[must_use]
    pub fn descriptor_mode(mut self, mode: DescriptorMode) -> Self {
        self.opts.descriptor_mode = mode;
        self
    }

    #[must_use]
    pub fn finish(self) -> ConnectionOptions {
        self.opts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadCommitted,
    #[default]
    Snapshot,
    SnapshotTableStability,
}

/// Parameters passed to the library when a transaction starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    pub wait: bool,
    pub read_only: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::default(),
            wait: true,
            read_only: false,
        }
    }
}

impl TransactionOptions {
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    #[must_use]
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }
}

/// Sizing and queueing policy handed to the underlying generic pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub max_size: usize,
    #[serde(default)]
    pub wait_timeout: Option<Duration>,
    #[serde(default)]
    pub create_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 10,
            wait_timeout: None,
            create_timeout: None,
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn builder() -> PoolOptionsBuilder {
        PoolOptionsBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolOptionsBuilder {
    opts: PoolOptions,
}

impl PoolOptionsBuilder {
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.opts.max_size = max_size;
        self
    }

    #[must_use]
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.opts.wait_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn create_timeout(mut self, timeout: Duration) -> Self {
        self.opts.create_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn finish(self) -> PoolOptions {
        self.opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let opts = ConnectionOptions::builder("/data/app.fdb")
            .host("db.internal")
            .port(3051)
            .user("app")
            .password("secret")
            .role("REPORTING")
            .descriptor_mode(DescriptorMode::Fixed)
            .finish();
        assert_eq!(opts.host, "db.internal");
        assert_eq!(opts.port, 3051);
        assert_eq!(opts.role.as_deref(), Some("REPORTING"));
        assert_eq!(opts.descriptor_mode, DescriptorMode::Fixed);
        assert_eq!(opts.page_size, 4096);
    }

    #[test]
    fn parses_json_with_defaults() {
        let opts = ConnectionOptions::from_json(
            r#"{"host":"localhost","port":3050,"database":"/tmp/t.fdb","user":"SYSDBA"}"#,
        )
        .unwrap();
        assert_eq!(opts.password, "");
        assert_eq!(opts.descriptor_mode, DescriptorMode::Normalized);
        assert_eq!(opts.page_size, 4096);
    }

    #[test]
    fn rejects_empty_database() {
        let err = ConnectionOptions::from_json(
            r#"{"host":"localhost","port":3050,"database":"  ","user":"SYSDBA"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SqlRuntimeError::ConfigError(_)));
    }

    #[test]
    fn isolation_parses_from_cli_value() {
        let level = IsolationLevel::from_str("read-committed", true).unwrap();
        assert_eq!(level, IsolationLevel::ReadCommitted);
    }

    #[test]
    fn pool_builder() {
        let opts = PoolOptions::builder()
            .max_size(2)
            .wait_timeout(Duration::from_millis(50))
            .finish();
        assert_eq!(opts.max_size, 2);
        assert_eq!(opts.wait_timeout, Some(Duration::from_millis(50)));
        assert_eq!(opts.create_timeout, None);
    }
}
