use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::workflows::background_check::WorkflowSettings;

const DEFAULT_GRACE_PERIOD_SECS: u64 = 60 * 60 * 24 * 7;
const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 60;
const DEFAULT_THIRDPARTY_TIMEOUT_SECS: u64 = 5;
const DEFAULT_HIRING_MANAGER_EMAIL: &str = "Hiring Manager <hiring@company.local>";
const DEFAULT_RESEARCHERS: &str =
    "researcher1@example.com,researcher2@example.com,researcher3@example.com";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub checks: ChecksConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            checks: ChecksConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Background-check orchestration knobs and collaborator endpoints.
#[derive(Debug, Clone)]
pub struct ChecksConfig {
    pub accept_grace_period: Duration,
    pub research_deadline: Duration,
    pub search_timeout: Duration,
    pub thirdparty_url: Option<String>,
    pub thirdparty_timeout: Duration,
    pub journal_dir: Option<PathBuf>,
    pub hiring_manager_email: String,
    pub researchers: Vec<String>,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            accept_grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            research_deadline: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            search_timeout: Duration::from_secs(DEFAULT_SEARCH_TIMEOUT_SECS),
            thirdparty_url: None,
            thirdparty_timeout: Duration::from_secs(DEFAULT_THIRDPARTY_TIMEOUT_SECS),
            journal_dir: None,
            hiring_manager_email: DEFAULT_HIRING_MANAGER_EMAIL.to_string(),
            researchers: split_list(DEFAULT_RESEARCHERS),
        }
    }
}

impl ChecksConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let researchers = match env::var("BGC_RESEARCHERS") {
            Ok(raw) => split_list(&raw),
            Err(_) => defaults.researchers,
        };
        if researchers.is_empty() {
            return Err(ConfigError::EmptyResearcherPool);
        }

        Ok(Self {
            accept_grace_period: seconds_var(
                "BGC_ACCEPT_GRACE_PERIOD_SECS",
                defaults.accept_grace_period,
            )?,
            research_deadline: seconds_var("BGC_RESEARCH_DEADLINE_SECS", defaults.research_deadline)?,
            search_timeout: seconds_var("BGC_SEARCH_TIMEOUT_SECS", defaults.search_timeout)?,
            thirdparty_url: non_empty_var("BGC_THIRDPARTY_URL"),
            thirdparty_timeout: seconds_var(
                "BGC_THIRDPARTY_TIMEOUT_SECS",
                defaults.thirdparty_timeout,
            )?,
            journal_dir: non_empty_var("BGC_JOURNAL_DIR").map(PathBuf::from),
            hiring_manager_email: non_empty_var("BGC_HIRING_MANAGER_EMAIL")
                .unwrap_or(defaults.hiring_manager_email),
            researchers,
        })
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            accept_grace_period: self.accept_grace_period,
            research_deadline: self.research_deadline,
            search_timeout: self.search_timeout,
            hiring_manager_email: self.hiring_manager_email.clone(),
            researchers: self.researchers.clone(),
        }
    }
}

fn seconds_var(variable: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match non_empty_var(variable) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidNumber { variable }),
        None => Ok(default),
    }
}

fn non_empty_var(variable: &str) -> Option<String> {
    env::var(variable)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
    EmptyResearcherPool,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a whole number of seconds")
            }
            ConfigError::EmptyResearcherPool => {
                write!(f, "BGC_RESEARCHERS must name at least one researcher")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::EmptyResearcherPool => None,
        }
    }
}
