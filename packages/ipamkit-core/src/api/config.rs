use crate::error::{IpamError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const ENV_URL: &str = "MYIPAM_URL";
const ENV_APP_ID: &str = "MYIPAM_APPID";
const ENV_TOKEN: &str = "MYIPAM_TOKEN";
const ENV_USER: &str = "MYIPAM_USER";
const ENV_PASSWORD: &str = "MYIPAM_PASSWD";
const ENV_CACERT: &str = "MYIPAM_CACERT";

/// Value of `cacert` that turns certificate verification off.
pub const CACERT_NONE: &str = "NONE";

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    server: Option<ServerConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfig {
    /// Service root (e.g., "https://ipam.example.com")
    url: Option<String>,
    /// API application id registered at the service
    app_id: Option<String>,
    /// Static application token
    token: Option<String>,
    user: Option<String>,
    password: Option<String>,
    /// PEM file with the CA to trust, or "NONE"
    cacert: Option<String>,
    timeout_secs: Option<u64>,
}

/// Values given explicitly, typically from command line flags.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub app_id: Option<String>,
    pub token: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub cacert: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Runtime connection settings
#[derive(Debug, Clone, Serialize)]
pub struct IpamConfig {
    pub url: String,
    pub app_id: String,
    pub token: String,
    pub user: String,
    #[serde(skip)]
    pub password: String,
    pub cacert: String,
    pub timeout_secs: u64,
    /// Where the service URL came from (for display)
    pub source: ConfigSource,
}

/// Where the configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Nothing configured
    Default,
    /// Given on the command line
    CommandLine,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::CommandLine => write!(f, "command line"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

impl IpamConfig {
    /// Uses user/password login rather than a static token.
    pub fn uses_login(&self) -> bool {
        !self.user.is_empty()
    }

    /// Check that the settings are enough to reach and authenticate.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(IpamError::Config(format!(
                "no service URL (set {} or [server].url)",
                ENV_URL
            )));
        }
        if self.app_id.is_empty() {
            return Err(IpamError::Config(format!(
                "no API application id (set {} or [server].app_id)",
                ENV_APP_ID
            )));
        }
        if self.uses_login() {
            if self.password.is_empty() {
                return Err(IpamError::Config(format!(
                    "empty password for user '{}', can't connect to any server",
                    self.user
                )));
            }
        } else if self.token.is_empty() {
            return Err(IpamError::Config(format!(
                "no credentials (set {} or {}/{})",
                ENV_TOKEN, ENV_USER, ENV_PASSWORD
            )));
        }
        Ok(())
    }
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("ipamkit").join("config.toml"))
}

/// Load configuration from the config file
fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Load connection settings. Each field is taken from, in order:
/// 1. Explicit overrides (command line)
/// 2. Environment variables (MYIPAM_URL, MYIPAM_APPID, ...)
/// 3. Config file (~/.config/ipamkit/config.toml)
/// 4. Defaults
pub fn load_config(overrides: &ConfigOverrides) -> IpamConfig {
    resolve(overrides, |key| std::env::var(key).ok(), load_config_file())
}

fn resolve(
    overrides: &ConfigOverrides,
    env: impl Fn(&str) -> Option<String>,
    file: Option<ConfigFile>,
) -> IpamConfig {
    let file = file.and_then(|f| f.server).unwrap_or_default();

    let pick = |explicit: &Option<String>, key: &str, from_file: &Option<String>| {
        let clean = |v: &String| {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        };
        explicit
            .as_ref()
            .and_then(clean)
            .map(|v| (v, ConfigSource::CommandLine))
            .or_else(|| {
                env(key)
                    .as_ref()
                    .and_then(clean)
                    .map(|v| (v, ConfigSource::Environment))
            })
            .or_else(|| {
                from_file
                    .as_ref()
                    .and_then(clean)
                    .map(|v| (v, ConfigSource::ConfigFile))
            })
            .unwrap_or((String::new(), ConfigSource::Default))
    };

    let (url, source) = pick(&overrides.url, ENV_URL, &file.url);
    let url = url.trim_end_matches('/').to_string();

    let config = IpamConfig {
        url,
        app_id: pick(&overrides.app_id, ENV_APP_ID, &file.app_id).0,
        token: pick(&overrides.token, ENV_TOKEN, &file.token).0,
        user: pick(&overrides.user, ENV_USER, &file.user).0,
        password: pick(&overrides.password, ENV_PASSWORD, &file.password).0,
        cacert: pick(&overrides.cacert, ENV_CACERT, &file.cacert).0,
        timeout_secs: overrides
            .timeout_secs
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
        source,
    };

    tracing::debug!(
        "Using IPAM service {} (from {})",
        if config.url.is_empty() { "<unset>" } else { config.url.as_str() },
        config.source
    );
    config
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/ipamkit/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# ipamkit configuration
# Place this file at: ~/.config/ipamkit/config.toml
# Environment variables (MYIPAM_URL, MYIPAM_APPID, MYIPAM_TOKEN, MYIPAM_USER,
# MYIPAM_PASSWD, MYIPAM_CACERT) take precedence over this file.

[server]
url = "https://ipam.example.com"
app_id = "myipamclient"

# Either a static application token...
# token = "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"

# ...or a user login
# user = "myipamuser"
# password = "secret"

# PEM file with the CA to trust, or "NONE" to skip verification
# cacert = "/etc/ssl/certs/ipam-ca.pem"

# timeout_secs = 30
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn file_of(content: &str) -> Option<ConfigFile> {
        Some(toml::from_str(content).unwrap())
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = resolve(&ConfigOverrides::default(), env_of(&[]), None);
        assert_eq!(config.url, "");
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.source, ConfigSource::Default);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_priority_flag_env_file() {
        let file = file_of(
            r#"
            [server]
            url = "https://file.example.com/"
            app_id = "fileapp"
            token = "filetoken"
            timeout_secs = 5
            "#,
        );
        let env = env_of(&[(ENV_URL, "https://env.example.com"), (ENV_TOKEN, "  ")]);

        let config = resolve(&ConfigOverrides::default(), &env, file);
        assert_eq!(config.url, "https://env.example.com");
        assert_eq!(config.source, ConfigSource::Environment);
        assert_eq!(config.app_id, "fileapp");
        // Blank environment values don't shadow the file.
        assert_eq!(config.token, "filetoken");
        assert_eq!(config.timeout_secs, 5);

        let overrides = ConfigOverrides {
            url: Some("https://flag.example.com".to_string()),
            ..Default::default()
        };
        let config = resolve(&overrides, &env, None);
        assert_eq!(config.url, "https://flag.example.com");
        assert_eq!(config.source, ConfigSource::CommandLine);
    }

    #[test]
    fn test_trailing_slash_trimmed_from_file_url() {
        let file = file_of("[server]\nurl = \"https://ipam.example.com/\"\n");
        let config = resolve(&ConfigOverrides::default(), env_of(&[]), file);
        assert_eq!(config.url, "https://ipam.example.com");
        assert_eq!(config.source, ConfigSource::ConfigFile);
    }

    #[test]
    fn test_validate_credentials() {
        let env = env_of(&[
            (ENV_URL, "https://ipam.example.com"),
            (ENV_APP_ID, "client"),
            (ENV_USER, "admin"),
        ]);
        let config = resolve(&ConfigOverrides::default(), &env, None);
        assert!(config.uses_login());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("empty password"), "{}", err);

        let overrides = ConfigOverrides {
            password: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(resolve(&overrides, &env, None).validate().is_ok());

        let token_only = env_of(&[
            (ENV_URL, "https://ipam.example.com"),
            (ENV_APP_ID, "client"),
            (ENV_TOKEN, "abc"),
        ]);
        let config = resolve(&ConfigOverrides::default(), token_only, None);
        assert!(!config.uses_login());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_config_parses() {
        let parsed: ConfigFile = toml::from_str(&generate_example_config()).unwrap();
        let server = parsed.server.unwrap();
        assert_eq!(server.app_id.as_deref(), Some("myipamclient"));
    }
}
