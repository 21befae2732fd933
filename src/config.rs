use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub campaigns: CampaignsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// How a window whose end time is before its start time is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OvernightWindows {
    /// "22:00-02:00" runs until 02:00 on the following calendar date.
    #[default]
    Wrap,
    /// "22:00-02:00" stops at midnight of the day it started.
    Clip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default = "default_cache_bucket_secs")]
    pub cache_bucket_secs: i64,
    #[serde(default)]
    pub overnight_windows: OvernightWindows,
}

fn default_cache_bucket_secs() -> i64 {
    60
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            cache_bucket_secs: default_cache_bucket_secs(),
            overnight_windows: OvernightWindows::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignSourceKind {
    #[default]
    Database,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignsConfig {
    #[serde(default)]
    pub source: CampaignSourceKind,
    pub endpoint_url: Option<String>,
    #[serde(default = "default_campaign_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_campaign_timeout_ms() -> u64 {
    500
}

impl Default for CampaignsConfig {
    fn default() -> Self {
        Self {
            source: CampaignSourceKind::default(),
            endpoint_url: None,
            timeout_ms: default_campaign_timeout_ms(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.resolution.cache_bucket_secs <= 0 {
            anyhow::bail!("resolution.cache_bucket_secs must be positive");
        }
        if self.campaigns.source == CampaignSourceKind::Http
            && self.campaigns.endpoint_url.is_none()
        {
            anyhow::bail!("campaigns.endpoint_url is required when campaigns.source = \"http\"");
        }
        Ok(())
    }

    pub fn default_template() -> &'static str {
        r#"[server]
host = "0.0.0.0"
port = 8080

[database]
# URL for the SQLite database. Ensure the directory exists.
url = "sqlite://scheduler.db"

[jwt]
# Shared secret of the identity provider that issues operator tokens.
secret = "change-me-in-production"

[logging]
level = "info"

[resolution]
# Decisions are cached per schedule for one bucket of this many seconds.
cache_bucket_secs = 60
# "wrap": 22:00-02:00 continues into the next day. "clip": it stops at midnight.
overnight_windows = "wrap"

[campaigns]
# "database" reads the campaigns tables, "http" asks an external campaign service.
source = "database"
# endpoint_url = "http://campaigns.internal/api/active"
timeout_ms = 500
"#
    }
}
