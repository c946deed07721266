use std::collections::HashSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;

use crate::error::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Deadline for a whole hook request, login and record submission included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_propagation_wait_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub zone: String,
    #[serde(default)]
    pub key: Option<String>,  // 访问密钥，用于鉴权（可选）

    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Numeric id of the zone inside the control panel. Empty means the default.
    #[serde(default)]
    pub domain_id: String,
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,

    #[serde(default)]
    pub ttl_secs: u64,
    #[serde(default = "default_propagation_wait_secs")]
    pub propagation_wait_secs: u64,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("zone", &self.zone)
            .field("username", &self.username)
            .field("domain_id", &self.domain_id)
            .field("base_url", &self.base_url)
            .field("token_mode", &self.uses_token())
            .field("ttl_secs", &self.ttl_secs)
            .field("propagation_wait_secs", &self.propagation_wait_secs)
            .finish_non_exhaustive()
    }
}

const ENV_PLACEHOLDER: &str = "{env.";

/// Replaces every `{env.NAME}` in `value` with the variable's content.
fn expand_env(value: &str) -> std::result::Result<String, Error> {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find(ENV_PLACEHOLDER) {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + ENV_PLACEHOLDER.len()..];
        let Some(end) = after.find('}') else {
            return Err(Error::Config(format!("unterminated placeholder in '{}'", value)));
        };
        let name = &after[..end];
        let resolved = env::var(name).map_err(|_| {
            Error::Config(format!("environment variable '{}' is not set", name))
        })?;
        expanded.push_str(&resolved);
        rest = &after[end + 1..];
    }
    expanded.push_str(rest);
    Ok(expanded)
}

impl ProviderConfig {
    /// Resolves `{env.NAME}` placeholders in the secret fields.
    pub fn resolve_secrets(&mut self) -> std::result::Result<(), Error> {
        self.password = expand_env(&self.password)?;
        if let Some(token) = self.api_token.as_mut() {
            *token = expand_env(token)?;
        }
        Ok(())
    }

    /// Username/password login is skipped entirely when a token is configured.
    pub fn uses_token(&self) -> bool {
        self.api_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn propagation_wait(&self) -> Duration {
        Duration::from_secs(self.propagation_wait_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("provider is missing 'name'".to_string()));
        }
        if self.zone.trim_matches('.').is_empty() {
            return Err(Error::Config(format!(
                "provider '{}' is missing 'zone'",
                self.name
            )));
        }

        if self.uses_token() {
            let endpoint = self.token_endpoint.as_deref().unwrap_or("");
            if endpoint.is_empty() {
                return Err(Error::Config(format!(
                    "provider '{}' uses 'api_token' but has no 'token_endpoint'",
                    self.name
                )));
            }
            Url::parse(endpoint).map_err(|e| {
                Error::Config(format!("invalid 'token_endpoint' '{}': {}", endpoint, e))
            })?;
            return Ok(());
        }

        if self.username.is_empty() {
            return Err(Error::Config(format!(
                "provider '{}' is missing 'username'",
                self.name
            )));
        }
        if self.password.is_empty() {
            return Err(Error::Config(format!(
                "provider '{}' is missing 'password'",
                self.name
            )));
        }
        if !self.base_url.is_empty() {
            Url::parse(&self.base_url).map_err(|e| {
                Error::Config(format!("invalid 'base_url' '{}': {}", self.base_url, e))
            })?;
        }
        Ok(())
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        for provider in &mut config.providers {
            provider.resolve_secrets()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), Error> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}
