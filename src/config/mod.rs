use crate::auth::ClientCredentials;
use crate::error::Error;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "https://api.salesforce.com";
pub const DEFAULT_API_PATH: &str = "/einstein/ai-agent/v1";
pub const TOKEN_PATH: &str = "/services/oauth2/token";

/// Environment variables that override file values.
pub const ENV_DOMAIN_URL: &str = "SF_DOMAIN_URL";
pub const ENV_CLIENT_ID: &str = "SF_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "SF_CLIENT_SECRET";
pub const ENV_TOKEN_URL: &str = "SF_TOKEN_URL";
pub const ENV_AGENT_ID: &str = "AGENTFORCE_AGENT_ID";
pub const ENV_API_URL: &str = "AGENTFORCE_API_URL";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Org domain, e.g. `https://acme.my.salesforce.com`. Also sent as the
    /// session's instance endpoint.
    pub domain_url: Option<String>,
    pub agent_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Defaults to `<domain_url>/services/oauth2/token`.
    pub token_url: Option<String>,
    pub api_base_url: String,
    pub api_path: String,
    pub token_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain_url: None,
            agent_id: None,
            client_id: None,
            client_secret: None,
            token_url: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_path: DEFAULT_API_PATH.to_string(),
            token_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("domain_url", &self.domain_url)
            .field("agent_id", &self.agent_id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_url", &self.token_url)
            .field("api_base_url", &self.api_base_url)
            .field("api_path", &self.api_path)
            .field("token_timeout_secs", &self.token_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("agentforce-bridge"))
            .unwrap_or_else(|| PathBuf::from(".agentforce-bridge"))
            .join("config.toml")
    }

    /// Load the file (if present) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Override fields from `lookup`. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_DOMAIN_URL) {
            self.domain_url = Some(v);
        }
        if let Some(v) = get(ENV_CLIENT_ID) {
            self.client_id = Some(v);
        }
        if let Some(v) = get(ENV_CLIENT_SECRET) {
            self.client_secret = Some(v);
        }
        if let Some(v) = get(ENV_TOKEN_URL) {
            self.token_url = Some(v);
        }
        if let Some(v) = get(ENV_AGENT_ID) {
            self.agent_id = Some(v);
        }
        if let Some(v) = get(ENV_API_URL) {
            self.api_base_url = v;
        }
    }

    /// Check required fields and derive the runtime settings.
    pub fn resolve(&self) -> Result<Settings, Error> {
        let domain_url = required(&self.domain_url, "domain_url", ENV_DOMAIN_URL)?;
        let domain_url = parse_url(domain_url, "domain_url")?;
        let domain_url = domain_url.as_str().trim_end_matches('/').to_string();

        let agent_id = required(&self.agent_id, "agent_id", ENV_AGENT_ID)?.to_string();
        let client_id = required(&self.client_id, "client_id", ENV_CLIENT_ID)?.to_string();
        let client_secret =
            required(&self.client_secret, "client_secret", ENV_CLIENT_SECRET)?.to_string();

        let token_url = match self.token_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => parse_url(url, "token_url")?.to_string(),
            _ => format!("{domain_url}{TOKEN_PATH}"),
        };

        let api_base = parse_url(&self.api_base_url, "api_base_url")?;
        let api_base_url = format!(
            "{}/{}",
            api_base.as_str().trim_end_matches('/'),
            self.api_path.trim_matches('/')
        );

        Ok(Settings {
            credentials: ClientCredentials {
                token_url,
                client_id,
                client_secret,
            },
            agent_id,
            instance_endpoint: domain_url,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            token_timeout: Duration::from_secs(self.token_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        })
    }
}

/// Validated values the service objects are built from.
#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: ClientCredentials,
    pub agent_id: String,
    /// Org domain sent as `instanceConfig.endpoint`.
    pub instance_endpoint: String,
    /// Agent API root, including the API path.
    pub api_base_url: String,
    pub token_timeout: Duration,
    pub connect_timeout: Duration,
}

fn required<'a>(value: &'a Option<String>, field: &str, env: &str) -> Result<&'a str, Error> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Config(format!(
            "missing {field} (set it in the config file or {env})"
        ))),
    }
}

fn parse_url(value: &str, field: &str) -> Result<Url, Error> {
    Url::parse(value.trim()).map_err(|e| Error::Config(format!("invalid {field} {value:?}: {e}")))
}
