//! Configuration manager.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot open configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_PORT: u16 = 8080;
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Domain name of current instance.
    pub url: String,
    /// Listening port.
    pub port: Option<u16>,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to automatic mail sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Related to access token verification.
    #[serde(skip_serializing)]
    pub token: Option<Token>,
    /// Related to password recovery.
    #[serde(default, skip_serializing)]
    pub reset: Reset,
    /// Related to profile rendering.
    #[serde(default, skip_serializing)]
    pub view: View,
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// RabbitMQ mailing configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// Hostname:(?port) for RabbitMQ instance.
    pub address: String,
    /// RabbitMQ default vhost.
    pub vhost: Option<String>,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to send mailing events.
    pub queue: String,
}

/// Access token verification.
///
/// Tokens are issued by another service; only one of `secret` (HS256) and
/// `public_key_pem` (ES256) should be set.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    pub secret: Option<String>,
    pub public_key_pem: Option<String>,
    /// Expected `aud` claim.
    pub audience: Option<String>,
}

/// Password reset configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Reset {
    /// Lifetime of a reset token.
    pub ttl_minutes: u32,
    /// Shortest accepted password. Absent means any password.
    pub min_password_length: Option<usize>,
    /// Page receiving `?token=...&email=...`.
    pub link: Option<String>,
}

impl Default for Reset {
    fn default() -> Self {
        Self {
            ttl_minutes: 60,
            min_password_length: None,
            link: None,
        }
    }
}

/// Profile rendering configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct View {
    pub locale: String,
    /// `chrono` format string applied to birthdays.
    pub date_format: String,
}

impl Default for View {
    fn default() -> Self {
        Self {
            locale: "en".into(),
            date_format: "%Y-%m-%d".into(),
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    #[cfg(test)]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Parse `path` and normalize URLs. Nothing falls back here.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let mut config: Configuration = serde_yaml::from_reader(file)?;

        config.version = VERSION.to_owned();
        if !config.url.is_empty() {
            config.url = with_scheme(&config.url)?;
        }
        if let Some(link) = config.reset.link.take() {
            config.reset.link = Some(with_scheme(&link)?);
        }

        Ok(config)
    }

    /// Read the file given with [`Configuration::path`], or `config.yaml`.
    ///
    /// A missing or unparsable file yields defaults; only a malformed URL
    /// is an error.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let path = if self.path.is_file() {
            self.path.clone()
        } else {
            PathBuf::from(DEFAULT_CONFIG_PATH)
        };

        match Self::load(&path) {
            Ok(config) => Ok(Arc::new(config)),
            Err(ConfigError::Url(err)) => Err(err),
            Err(err) => {
                tracing::error!(error = %err, path = %path.display(), "configuration not loaded, using defaults");
                Ok(Arc::new(Self {
                    version: VERSION.to_owned(),
                    ..Default::default()
                }))
            },
        }
    }
}

/// Prefix `https://` when `url` carries no scheme.
fn with_scheme(url: &str) -> Result<String, url::ParseError> {
    let parsed = match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => parsed,
        _ => Url::parse(&format!("https://{url}"))?,
    };
    Ok(parsed.to_string())
}
