//! Configuration
//!
//! Connection targets come from `redis://` URIs, passwords may also come from
//! the environment. Migration tuning lives in `MigrationConfig`.

use percent_encoding::percent_decode_str;
use std::fmt;
use url::Url;

/// Environment variable holding the source password
pub const ENV_AUTH_FROM: &str = "RUMP_AUTH_FROM";

/// Environment variable holding the destination password
pub const ENV_AUTH_TO: &str = "RUMP_AUTH_TO";

/// Port used when the URI does not name one
pub const DEFAULT_PORT: u16 = 6379;

/// Number of batches allowed in flight between exporter and importer
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Where and how to connect to one store
#[derive(Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Host name or IP address
    pub host: String,

    /// TCP port
    pub port: u16,

    /// Password for AUTH, None to skip authentication
    pub password: Option<String>,

    /// Logical database selected after connecting
    pub database: u32,
}

impl ConnectionConfig {
    /// Parse a `redis://[:password@]host[:port][/db]` URI
    ///
    /// A non-empty `password` overrides the one embedded in the URI; an empty
    /// one counts as absent.
    pub fn from_url(uri: &str, password: Option<String>) -> Result<Self, ConfigError> {
        let invalid =
            |e: &dyn fmt::Display| ConfigError::InvalidUri(uri.to_string(), e.to_string());
        let url = Url::parse(uri).map_err(|e| invalid(&e))?;

        if url.scheme() != "redis" {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => {
                host.trim_start_matches('[').trim_end_matches(']').to_string()
            }
            _ => return Err(ConfigError::MissingHost(uri.to_string())),
        };

        let port = url.port().unwrap_or(DEFAULT_PORT);

        let database = match url.path().trim_matches('/') {
            "" => 0,
            db => db
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidDatabase(db.to_string()))?,
        };

        // The URI keeps userinfo percent-encoded
        let uri_password = match url.password().filter(|p| !p.is_empty()) {
            Some(p) => Some(
                percent_decode_str(p)
                    .decode_utf8()
                    .map_err(|e| invalid(&e))?
                    .into_owned(),
            ),
            None => None,
        };
        let password = password.filter(|p| !p.is_empty()).or(uri_password);

        Ok(ConnectionConfig {
            host,
            port,
            password,
            database,
        })
    }

    /// Parse `uri`, taking the password from the environment variable `env_var`
    pub fn from_url_and_env(uri: &str, env_var: &str) -> Result<Self, ConfigError> {
        Self::from_url(uri, std::env::var(env_var).ok())
    }

    /// `host:port`, for dialing and for messages
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "redis://{}/{}", self.address(), self.database)
    }
}

/// Migration tuning
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    /// Capacity of the batch queue
    pub queue_capacity: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The URI could not be parsed
    InvalidUri(String, String),

    /// Only `redis://` is understood
    UnsupportedScheme(String),

    /// The URI names no host
    MissingHost(String),

    /// The path is not a database number
    InvalidDatabase(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidUri(uri, e) => write!(f, "Invalid URI {:?}: {}", uri, e),
            ConfigError::UnsupportedScheme(s) => {
                write!(f, "Unsupported scheme {:?}, expected redis://", s)
            }
            ConfigError::MissingHost(uri) => write!(f, "No host in URI {:?}", uri),
            ConfigError::InvalidDatabase(db) => write!(f, "Invalid database number {:?}", db),
        }
    }
}

impl std::error::Error for ConfigError {}
