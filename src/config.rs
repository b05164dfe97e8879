//! Gateway configuration.
//!
//! Values come from a JSON file, `GATEWAY_*` environment variables, or both
//! (environment wins). Everything has a default, so an empty configuration
//! is valid.

use crate::engine::DEFAULT_MAX_PARALLELISM;
use crate::error::{Error, Result};
use crate::middleware::DEFAULT_IDENTITY_HEADER;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of the environment variables read by [`GatewayConfig::from_env`].
pub const ENV_PREFIX: &str = "GATEWAY_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Address the HTTP server binds to
    pub listen_addr: String,
    /// Maximum resolvers running at once within one request
    pub max_parallelism: usize,
    /// Per-request deadline in milliseconds; unbounded when absent
    pub request_timeout_ms: Option<u64>,
    /// Header carrying the upstream-authenticated identity
    pub identity_header: String,
    /// SDL file to load the schema from
    pub schema_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8888".to_string(),
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            request_timeout_ms: None,
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            schema_path: None,
        }
    }
}

impl GatewayConfig {
    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `GATEWAY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Apply `GATEWAY_*` environment variables on top of this configuration.
    pub fn merge_env(self) -> Result<Self> {
        self.merge_lookup(|key| std::env::var(key).ok())
    }

    fn merge_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(addr) = var("LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(raw) = var("MAX_PARALLELISM") {
            self.max_parallelism = parse_number("GATEWAY_MAX_PARALLELISM", &raw)?;
        }
        if let Some(raw) = var("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = match raw.trim() {
                "" | "0" => None,
                ms => Some(parse_number("GATEWAY_REQUEST_TIMEOUT_MS", ms)?),
            };
        }
        if let Some(header) = var("IDENTITY_HEADER") {
            self.identity_header = header;
        }
        if let Some(path) = var("SCHEMA_PATH") {
            self.schema_path = Some(PathBuf::from(path));
        }

        self.validate()?;
        Ok(self)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<()> {
        if self.max_parallelism == 0 {
            return Err(Error::Config("max_parallelism must be at least 1".into()));
        }
        if http::HeaderName::from_bytes(self.identity_header.as_bytes()).is_err() {
            return Err(Error::Config(format!(
                "identity_header '{}' is not a valid header name",
                self.identity_header
            )));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}={raw}: {e}")))
}
