use std::{env, fmt, net::SocketAddr, time::Duration};

use super::{parse_list, server_bind_address};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://catalog.db?mode=rwc";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_NOTIFIER_TYPES: &str = "sms";
pub const DEFAULT_NOTIFIER_TIMEOUT_MS: u64 = 2_000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Stock notification settings, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Channel names in the order they should be notified. Names are not
    /// checked here; unknown channels are skipped when notifiers are built.
    pub channels: Vec<String>,
    /// Upper bound for a single notifier invocation.
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channels: parse_list(DEFAULT_NOTIFIER_TYPES),
            timeout: Duration::from_millis(DEFAULT_NOTIFIER_TIMEOUT_MS),
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub public_base_url: String,
    pub notifier: NotifierConfig,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url =
            env::var("APP_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let public_base_url = env::var("APP_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_PUBLIC_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if public_base_url.is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }

        let channels = env::var("APP_NOTIFIER_TYPES")
            .map(|raw| parse_list(&raw))
            .unwrap_or_else(|_| parse_list(DEFAULT_NOTIFIER_TYPES));
        let timeout = match env::var("APP_NOTIFIER_TIMEOUT_MS") {
            Ok(raw) => parse_timeout_ms(&raw)?,
            Err(_) => Duration::from_millis(DEFAULT_NOTIFIER_TIMEOUT_MS),
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            public_base_url,
            notifier: NotifierConfig { channels, timeout },
        })
    }
}

fn parse_timeout_ms(raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidNotifierTimeout(raw.to_string())),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    EmptyBaseUrl,
    InvalidNotifierTimeout(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::EmptyBaseUrl => write!(f, "APP_PUBLIC_BASE_URL must not be empty"),
            Self::InvalidNotifierTimeout(value) => write!(
                f,
                "APP_NOTIFIER_TIMEOUT_MS must be a positive number of milliseconds (got {value})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));
