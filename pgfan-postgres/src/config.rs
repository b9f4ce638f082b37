//! PostgreSQL connection configuration.

use std::time::Duration;

use crate::error::{PgError, PgResult};

/// Environment variable read by [`PgConfig::from_env`].
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_USER: &str = "postgres";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgConfig {
    /// Host.
    pub host: String,
    /// Port (default: 5432).
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Username.
    pub user: String,
    /// Password.
    pub password: Option<String>,
    /// SSL mode.
    pub ssl_mode: SslMode,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Server-side statement timeout, applied to every session.
    pub statement_timeout: Option<Duration>,
    /// Application name (shown in pg_stat_activity).
    pub application_name: Option<String>,
    /// Extra server options, passed as `-c key=value`.
    pub options: Vec<(String, String)>,
}

/// SSL mode for connections.
///
/// Connections are opened without a TLS connector, so only modes that can
/// fall back to plain TCP are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Disable SSL.
    Disable,
    /// Prefer SSL but allow non-SSL.
    #[default]
    Prefer,
}

impl SslMode {
    fn parse(value: &str) -> PgResult<Self> {
        match value {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" | "verify-ca" | "verify-full" => Err(PgError::config(format!(
                "unsupported sslmode: {} (connections are made without TLS)",
                value
            ))),
            other => Err(PgError::config(format!("invalid sslmode: {}", other))),
        }
    }

    fn to_driver(self) -> tokio_postgres::config::SslMode {
        match self {
            Self::Disable => tokio_postgres::config::SslMode::Disable,
            Self::Prefer => tokio_postgres::config::SslMode::Prefer,
        }
    }
}

impl PgConfig {
    /// Parse a `postgres://` or `postgresql://` URL.
    ///
    /// Recognized query parameters are `sslmode`, `connect_timeout`
    /// (seconds), `statement_timeout` (milliseconds) and `application_name`;
    /// anything else is forwarded to the server as a session option.
    pub fn from_url(url: &str) -> PgResult<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| PgError::config(format!("invalid database URL: {}", e)))?;

        if parsed.scheme() != "postgresql" && parsed.scheme() != "postgres" {
            return Err(PgError::config(format!(
                "invalid scheme: expected 'postgresql' or 'postgres', got '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PgError::config("missing host in URL"))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(PgError::config("missing database name in URL"));
        }

        let user = match parsed.username() {
            "" => DEFAULT_USER.to_string(),
            name => name.to_string(),
        };

        let mut config = Self {
            host,
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            database,
            user,
            password: parsed.password().map(String::from),
            ssl_mode: SslMode::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            statement_timeout: None,
            application_name: None,
            options: Vec::new(),
        };

        for (key, value) in parsed.query_pairs() {
            match &*key {
                "sslmode" => config.ssl_mode = SslMode::parse(&value)?,
                "connect_timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| PgError::config("invalid connect_timeout"))?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                "statement_timeout" => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| PgError::config("invalid statement_timeout"))?;
                    config.statement_timeout = Some(Duration::from_millis(ms));
                }
                "application_name" => config.application_name = Some(value.into_owned()),
                _ => config.options.push((key.into_owned(), value.into_owned())),
            }
        }

        Ok(config)
    }

    /// Read the URL from `DATABASE_URL`.
    pub fn from_env() -> PgResult<Self> {
        let url = std::env::var(DATABASE_URL_ENV).map_err(|_| {
            PgError::config(format!(
                "missing database configuration: {} is not set",
                DATABASE_URL_ENV
            ))
        })?;
        Self::from_url(&url)
    }

    /// Create a builder for configuration.
    pub fn builder() -> PgConfigBuilder {
        PgConfigBuilder::new()
    }

    /// Server options string (`-c key=value ...`), if any.
    pub fn server_options(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(timeout) = self.statement_timeout {
            parts.push(format!("-c statement_timeout={}", timeout.as_millis()));
        }
        for (key, value) in &self.options {
            parts.push(format!("-c {}={}", key, value));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// Convert to tokio-postgres config.
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.dbname(&self.database);
        config.user(&self.user);
        config.ssl_mode(self.ssl_mode.to_driver());
        config.connect_timeout(self.connect_timeout);

        if let Some(ref password) = self.password {
            config.password(password);
        }

        if let Some(ref app_name) = self.application_name {
            config.application_name(app_name);
        }

        if let Some(options) = self.server_options() {
            config.options(&options);
        }

        config
    }
}

/// Builder for PostgreSQL configuration.
#[derive(Debug, Default)]
pub struct PgConfigBuilder {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
    ssl_mode: Option<SslMode>,
    connect_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
    application_name: Option<String>,
}

impl PgConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a database URL; explicit settings override it.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the SSL mode.
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = Some(mode);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the statement timeout.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Set the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PgResult<PgConfig> {
        let mut config = match self.url {
            Some(ref url) => PgConfig::from_url(url)?,
            None => PgConfig {
                host: "localhost".to_string(),
                port: DEFAULT_PORT,
                database: self
                    .database
                    .clone()
                    .ok_or_else(|| PgError::config("database name is required"))?,
                user: DEFAULT_USER.to_string(),
                password: None,
                ssl_mode: SslMode::default(),
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                statement_timeout: None,
                application_name: None,
                options: Vec::new(),
            },
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database) = self.database {
            config.database = database;
        }
        if let Some(user) = self.user {
            config.user = user;
        }
        if let Some(password) = self.password {
            config.password = Some(password);
        }
        if let Some(ssl_mode) = self.ssl_mode {
            config.ssl_mode = ssl_mode;
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = self.statement_timeout {
            config.statement_timeout = Some(timeout);
        }
        if let Some(name) = self.application_name {
            config.application_name = Some(name);
        }

        if config.host.is_empty() {
            return Err(PgError::config("host must not be empty"));
        }

        Ok(config)
    }
}
