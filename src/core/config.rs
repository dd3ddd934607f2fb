use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::scheduler::compiler::ScheduleZone;

pub const CONFIG_ENV: &str = "AGENTDESK_CONFIG";
pub const HOST_ENV: &str = "AGENTDESK_API_HOST";
pub const PORT_ENV: &str = "AGENTDESK_API_PORT";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; `"*"` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub timezone: ScheduleZone,

    /// Upper bound on one nap of the timer loop.
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_max_sleep_secs() -> u64 {
    60
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: ScheduleZone::default(),
            max_sleep_secs: default_max_sleep_secs(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Locate and load the config file. An explicit path must exist; the
    /// default location is optional.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (Some(p.to_path_buf()), true),
            None => match std::env::var(CONFIG_ENV).ok().filter(|v| !v.is_empty()) {
                Some(p) => (Some(PathBuf::from(p)), true),
                None => (default_config_path(), false),
            },
        };

        let mut config = match path {
            Some(path) if required || path.exists() => Self::from_file(&path).await?,
            _ => {
                info!("No config file found, using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = env(HOST_ENV).filter(|h| !h.trim().is_empty()) {
            self.server.host = host.trim().to_string();
        }
        if let Some(port) = env(PORT_ENV).filter(|p| !p.trim().is_empty()) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{} must be a port number, got '{}'", PORT_ENV, port))?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("agentdesk").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.server.cors_origins, vec!["*"]);
        assert_eq!(config.scheduler.timezone, ScheduleZone::Local);
        assert_eq!(config.scheduler.max_sleep_secs, 60);
        assert_eq!(config.gateway.provider, "openai");
        assert_eq!(config.gateway.timeout_secs, 60);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::parse(
            r#"
            [scheduler]
            timezone = "utc"

            [gateway]
            provider = "google"
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.timezone, ScheduleZone::Utc);
        assert_eq!(config.scheduler.max_sleep_secs, 60);
        assert_eq!(config.gateway.provider, "google");
        assert_eq!(config.gateway.timeout_secs, 5);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(AppConfig::parse("[scheduler]\ntimezone = \"mars\"").is_err());
    }

    #[test]
    fn env_overrides_replace_host_and_port() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|key| match key {
                HOST_ENV => Some("0.0.0.0".into()),
                PORT_ENV => Some("9100".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:9100");

        assert!(config
            .apply_env_overrides(|key| (key == PORT_ENV).then(|| "eighty".to_string()))
            .is_err());
    }

    #[tokio::test]
    async fn explicit_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level = \"debug\"\n[server]\nport = 8123").unwrap();
        let config = AppConfig::from_file(file.path()).await.unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.server.port, 8123);
    }

    #[tokio::test]
    async fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(AppConfig::load(Some(missing.as_path())).await.is_err());
    }
}
