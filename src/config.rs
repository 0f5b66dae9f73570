use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Browser origins allowed to call the API
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

fn default_listen_address() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 secret shared with the auth service that issues bearer tokens
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/webmonitor.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "data/logs".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Smallest accepted task interval in seconds (default: 10)
    #[serde(default = "default_min_interval_sec")]
    pub min_interval_sec: u64,
    /// Largest accepted task interval in seconds (default: 1 day)
    #[serde(default = "default_max_interval_sec")]
    pub max_interval_sec: u64,
    /// Upper bound for one page load, including waiting for a session (default: 30)
    #[serde(default = "default_fetch_timeout_sec")]
    pub fetch_timeout_sec: u64,
    /// Number of pages that may be rendered at the same time (default: 4)
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Random delay added to the first firing of tasks loaded at startup
    #[serde(default = "default_startup_jitter_sec")]
    pub startup_jitter_sec: u64,
    /// Stored content excerpts are truncated to this many characters
    #[serde(default = "default_log_excerpt_chars")]
    pub log_excerpt_chars: usize,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Page renderer used for fetches (default: headless browser)
    #[serde(default)]
    pub renderer: RendererKind,
    /// Chrome binary for the browser renderer; auto-detected when unset
    #[serde(default)]
    pub chrome_executable: Option<String>,
    /// Longest time spent waiting for a rendered page to stop changing (default: 5)
    #[serde(default = "default_settle_timeout_sec")]
    pub settle_timeout_sec: u64,
    /// Response bodies larger than this are rejected (default: 10 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    #[default]
    Browser,
    Http,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval_sec: default_min_interval_sec(),
            max_interval_sec: default_max_interval_sec(),
            fetch_timeout_sec: default_fetch_timeout_sec(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            startup_jitter_sec: default_startup_jitter_sec(),
            log_excerpt_chars: default_log_excerpt_chars(),
            user_agent: None,
            renderer: RendererKind::default(),
            chrome_executable: None,
            settle_timeout_sec: default_settle_timeout_sec(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl SchedulerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_sec)
    }
}

fn default_settle_timeout_sec() -> u64 {
    5
}

fn default_max_body_bytes() -> usize {
    page_client::DEFAULT_MAX_BODY_BYTES
}

fn default_min_interval_sec() -> u64 {
    10
}

fn default_max_interval_sec() -> u64 {
    24 * 60 * 60
}

fn default_fetch_timeout_sec() -> u64 {
    30
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_startup_jitter_sec() -> u64 {
    5
}

fn default_log_excerpt_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    /// Timeout for one SMTP conversation (default: 30)
    #[serde(default = "default_smtp_timeout_sec")]
    pub smtp_timeout_sec: u64,
    /// Display name used in the From header
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            smtp_timeout_sec: default_smtp_timeout_sec(),
            sender_name: default_sender_name(),
        }
    }
}

impl NotificationConfig {
    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_timeout_sec)
    }
}

fn default_smtp_timeout_sec() -> u64 {
    30
}

fn default_sender_name() -> String {
    "WebMonitor".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubscriptionConfig {
    /// Quota for users without an explicit override (default: 10)
    #[serde(default = "default_max_subscriptions")]
    pub default_max_subscriptions: u32,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            default_max_subscriptions: default_max_subscriptions(),
        }
    }
}

fn default_max_subscriptions() -> u32 {
    10
}

impl Config {
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("WEBMON").separator("__"));

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            anyhow::bail!("auth.jwt_secret must not be empty");
        }
        if self.scheduler.min_interval_sec == 0
            || self.scheduler.min_interval_sec > self.scheduler.max_interval_sec
        {
            anyhow::bail!(
                "scheduler interval bounds are invalid: {}..={}",
                self.scheduler.min_interval_sec,
                self.scheduler.max_interval_sec
            );
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        match self.logging.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "info" => tracing::Level::INFO,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(source: &str) -> Result<Config> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = from_toml("[auth]\njwt_secret = \"s3cret\"\n").unwrap();
        assert_eq!(config.server.listen_address, "0.0.0.0:8000");
        assert_eq!(config.scheduler.min_interval_sec, 10);
        assert_eq!(config.scheduler.max_interval_sec, 86400);
        assert_eq!(config.scheduler.log_excerpt_chars, 2000);
        assert_eq!(config.subscription.default_max_subscriptions, 10);
        assert_eq!(config.log_level(), tracing::Level::INFO);
        assert_eq!(config.scheduler.renderer, RendererKind::Browser);
        assert_eq!(
            config.server.cors_origins,
            vec!["http://localhost:3000", "http://127.0.0.1:3000"]
        );
    }

    #[test]
    fn test_renderer_and_cors_overrides() {
        let source = "[auth]\njwt_secret = \"x\"\n[server]\ncors_origins = [\"https://app.example.com\"]\n[scheduler]\nrenderer = \"http\"\nmax_body_bytes = 1024\n";
        let config = from_toml(source).unwrap();
        assert_eq!(config.scheduler.renderer, RendererKind::Http);
        assert_eq!(config.scheduler.max_body_bytes, 1024);
        assert_eq!(config.server.cors_origins, vec!["https://app.example.com"]);
    }

    #[test]
    fn test_missing_secret_is_rejected() {
        assert!(from_toml("[server]\nlisten_address = \"127.0.0.1:1\"\n").is_err());
        assert!(from_toml("[auth]\njwt_secret = \"  \"\n").is_err());
    }

    #[test]
    fn test_inverted_interval_bounds_are_rejected() {
        let source = "[auth]\njwt_secret = \"x\"\n[scheduler]\nmin_interval_sec = 100\nmax_interval_sec = 50\n";
        assert!(from_toml(source).is_err());
    }
}
