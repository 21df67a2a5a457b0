//! Environment-driven server configuration.

use std::num::ParseIntError;

/// API base used when `DUNE_API_URL` is unset.
pub const DEFAULT_DUNE_API_URL: &str = "https://api.dune.com/api";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid PORT {value:?}: {source}")]
    InvalidPort {
        value: String,
        source: ParseIntError,
    },
}

/// Server settings read from the environment.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `HOST` | `127.0.0.1` | Bind address |
/// | `PORT` | `3003` | Listening port |
/// | `AUTH_TOKEN` | (none) | Shared secret required on the HTTP surface |
/// | `DUNE_API_KEY` | (none) | Credential for the Dune API |
/// | `DUNE_API_URL` | `https://api.dune.com/api` | Dune API base |
///
/// Empty values count as unset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
    pub dune_api_key: Option<String>,
    pub dune_api_url: String,
}

impl ServerConfig {
    /// Bind address when `HOST` is unset.
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    /// Port when `PORT` is unset.
    pub const DEFAULT_PORT: u16 = 3003;

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match var("PORT") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|source| ConfigError::InvalidPort { value, source })?,
            None => Self::DEFAULT_PORT,
        };

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            port,
            auth_token: var("AUTH_TOKEN"),
            dune_api_key: var("DUNE_API_KEY"),
            dune_api_url: var("DUNE_API_URL").unwrap_or_else(|| DEFAULT_DUNE_API_URL.to_string()),
        })
    }

    /// Whether the HTTP surface requires `AUTH_TOKEN`.
    pub fn auth_enabled(&self) -> bool {
        self.auth_token.is_some()
    }

    /// `host:port` for binding.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
