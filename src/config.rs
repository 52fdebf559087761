//! Proxy configuration module
//!
//! Handles loading and parsing of proxy configuration from a TOML file and
//! environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Address the proxy listens on for game clients
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Address of the real login server
    pub server_address: String,

    /// Keep the upstream session alive when all clients are gone
    #[serde(default)]
    pub background: bool,

    /// Reconnect and re-login automatically when the upstream link drops
    #[serde(default = "default_true")]
    pub autoreconnect: bool,

    /// Stored login used for automatic re-login
    #[serde(default)]
    pub login: Option<LoginConfig>,

    /// Client version string reported upstream when a client never sends one
    #[serde(default = "default_client_version")]
    pub client_version: String,
}

/// Stored credentials for automatic re-login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Account name
    pub username: String,

    /// Account password
    pub password: String,

    /// Index into the server list presented at login
    #[serde(default)]
    pub server_index: u16,

    /// Index into the character list presented after the relay
    #[serde(default)]
    pub character_index: u32,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:2593".to_string()
}

fn default_true() -> bool {
    true
}

fn default_client_version() -> String {
    "7.0.34.23".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/uogate.toml"),
            bind_address: default_bind_address(),
            server_address: String::new(),
            background: false,
            autoreconnect: default_true(),
            login: None,
            client_version: default_client_version(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        let config_path = env::var("UOGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/uogate.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("UOGATE_BIND") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("UOGATE_SERVER") {
            self.server_address = val;
        }
        if let Ok(val) = env::var("UOGATE_BACKGROUND") {
            self.background = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("UOGATE_AUTORECONNECT") {
            self.autoreconnect = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("UOGATE_CLIENT_VERSION") {
            self.client_version = val;
        }

        // A username/password pair in the environment replaces the file login
        if let (Ok(username), Ok(password)) =
            (env::var("UOGATE_USERNAME"), env::var("UOGATE_PASSWORD"))
        {
            let mut login = self.login.take().unwrap_or(LoginConfig {
                username: String::new(),
                password: String::new(),
                server_index: 0,
                character_index: 0,
            });
            login.username = username;
            login.password = password;
            self.login = Some(login);
        }
        if let Some(login) = self.login.as_mut() {
            if let Ok(val) = env::var("UOGATE_SERVER_INDEX") {
                if let Ok(index) = val.parse() {
                    login.server_index = index;
                }
            }
            if let Ok(val) = env::var("UOGATE_CHARACTER_INDEX") {
                if let Ok(index) = val.parse() {
                    login.character_index = index;
                }
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server_address.is_empty() {
            anyhow::bail!("server_address must be set (or UOGATE_SERVER exported)");
        }

        self.bind_address
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind_address: {}", self.bind_address))?;

        self.server_address
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid server_address: {}", self.server_address))?;

        if let Some(login) = &self.login {
            // The wire format carries credentials in 30-byte fields
            if login.username.is_empty() || login.username.len() > 30 {
                anyhow::bail!("Login username must be 1-30 characters");
            }
            if login.password.len() > 30 {
                anyhow::bail!("Login password must be at most 30 characters");
            }
        }

        Ok(())
    }

    /// Parsed bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_address.parse().expect("validated at startup")
    }

    /// Parsed upstream server address
    pub fn server_addr(&self) -> SocketAddr {
        self.server_address.parse().expect("validated at startup")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ProxyConfig {
        ProxyConfig {
            server_address: "127.0.0.1:2593".to_string(),
            bind_address: "127.0.0.1:2594".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:2593");
        assert!(config.autoreconnect);
        assert!(!config.background);
        assert!(config.login.is_none());
    }

    #[test]
    fn test_validation_requires_server() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_err());

        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_addresses() {
        let mut config = valid_config();
        config.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.server_address = "example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_login_limits() {
        let mut config = valid_config();
        config.login = Some(LoginConfig {
            username: "a".repeat(31),
            password: "secret".to_string(),
            server_index: 0,
            character_index: 0,
        });
        assert!(config.validate().is_err());

        config.login = Some(LoginConfig {
            username: "trader".to_string(),
            password: "secret".to_string(),
            server_index: 0,
            character_index: 2,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parsed_addresses() {
        let config = valid_config();
        assert_eq!(config.bind_addr().port(), 2594);
        assert_eq!(config.server_addr().port(), 2593);
    }
}
