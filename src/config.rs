use clap::ValueEnum;
use serde::Deserialize;
use serde::Deserializer;
use std::str::FromStr;
use std::time::Duration;
use std::{fmt, path::Path};
use tracing::Level;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "./config/config.yaml";
pub const DEFAULT_COUNTER_FILE: &str = "./config/mi_file.yaml";
pub const DEFAULT_LOG_FILE_NAME: &str = "lims-registrar.log";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOCK_POLL_INTERVAL_MS: u64 = 100;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum Environment {
    Dev,
    Prod,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Dev => write!(f, "dev"),
            Environment::Prod => write!(f, "prod"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(rename = "clarity_url", alias = "base_url")]
    pub base_url: String,
    pub username: String,
    #[serde(rename = "pass", alias = "password")]
    pub password: String,
    pub log_level: LogLevel,
    // Overrides the top-level log path for this environment
    #[serde(default)]
    pub log_file_path: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    // None waits for the counter lock indefinitely
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_lock_poll_interval_ms() -> u64 {
    DEFAULT_LOCK_POLL_INTERVAL_MS
}

impl EnvironmentConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub log_file_path: Option<String>,
    #[serde(default)]
    pub dev: Option<EnvironmentConfig>,
    #[serde(default)]
    pub prod: Option<EnvironmentConfig>,
}

impl AppConfig {
    pub fn environment(&self, env: Environment) -> Result<&EnvironmentConfig> {
        let section = match env {
            Environment::Dev => self.dev.as_ref(),
            Environment::Prod => self.prod.as_ref(),
        };
        section.ok_or_else(|| {
            Error::config(format!(
                "configuration has no section for environment '{}'",
                env
            ))
        })
    }

    /// Log destination for `env`: the environment override first, then the
    /// top-level `log_file_path`.
    pub fn log_file_path(&self, env: Environment) -> Result<&str> {
        let section = self.environment(env)?;
        section
            .log_file_path
            .as_deref()
            .or(self.log_file_path.as_deref())
            .ok_or_else(|| {
                Error::config(
                    "The log file could not be created or found. \
                     Please supply log file path in your config file.",
                )
            })
    }
}

#[derive(Debug)]
pub enum LogLevel {
    /// Designates very low priority, often extremely verbose, information.
    Trace = 0,
    /// Designates lower priority information.
    Debug = 1,
    /// Designates useful information.
    Info = 2,
    /// Designates hazardous situations.
    Warn = 3,
    /// Designates very serious errors.
    Error = 4,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level_str = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{}", level_str)
    }
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        LogLevel::from_str(&s.to_lowercase()).map_err(serde::de::Error::custom)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            // tracing has no level above error
            "error" | "critical" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

fn mask_secret(secret: &str) -> String {
    let char_count = secret.chars().count();
    if char_count < 3 {
        "*".to_owned()
    } else {
        let visible: String = secret.chars().take(1).collect();
        let mask: String = "*".repeat(char_count - 1);
        format!("{}{}", visible, mask)
    }
}

impl fmt::Display for EnvironmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    LIMS URL          : {}", self.base_url)?;
        writeln!(f, "    Username          : {}", self.username)?;
        writeln!(f, "    Password          : {}", mask_secret(&self.password))?;
        writeln!(f, "    Log Level         : {}", self.log_level)?;
        if let Some(path) = &self.log_file_path {
            writeln!(f, "    Log Path          : {}", path)?;
        }
        writeln!(f, "    HTTP Timeout      : {} s", self.http_timeout_secs)?;
        match self.lock_timeout_secs {
            Some(secs) => writeln!(f, "    Lock Timeout      : {} s", secs)?,
            None => writeln!(f, "    Lock Timeout      : none")?,
        }
        write!(
            f,
            "    Lock Poll Interval: {} ms",
            self.lock_poll_interval_ms
        )
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "LIMS Registrar Configuration:")?;
        writeln!(
            f,
            "  Log Path: {}",
            self.log_file_path.as_deref().unwrap_or("<unset>")
        )?;
        for (name, section) in [("dev", &self.dev), ("prod", &self.prod)] {
            if let Some(section) = section {
                writeln!(f, "\n  [{}]", name)?;
                writeln!(f, "{}", section)?;
            }
        }
        Ok(())
    }
}

pub async fn read_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::config(format!(
            "The config file '{}' does not exist.",
            path.display()
        )));
    }
    read_config_from_file(path).await
}

async fn read_config_from_file(path: &Path) -> Result<AppConfig> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::config(format!("Failed to read config {}: {}", path.display(), e))
    })?;
    parse_config(path, &contents)
}

fn parse_config(path: &Path, contents: &str) -> Result<AppConfig> {
    let malformed = |e: &dyn fmt::Display| {
        Error::config(format!("Malformed config {}: {}", path.display(), e))
    };

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(contents).map_err(|e| malformed(&e)),
        Some("toml") => toml::from_str(contents).map_err(|e| malformed(&e)),
        Some("json") => serde_json::from_str(contents).map_err(|e| malformed(&e)),
        _ => Err(Error::config(format!(
            "Unsupported config file format: {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const YAML: &str = r#"
log_file_path: ./logs
dev:
  clarity_url: https://lims-dev.example/api/v2/
  username: apiuser
  pass: hunter22
  log_level: debug
  lock_timeout_secs: 30
prod:
  clarity_url: https://lims.example/api/v2/
  username: apiuser
  pass: s3cret
  log_level: CRITICAL
  log_file_path: /var/log/lims
"#;

    #[test]
    fn parses_yaml_environments() {
        let cfg = parse_config(&PathBuf::from("config.yaml"), YAML).unwrap();

        let dev = cfg.environment(Environment::Dev).unwrap();
        assert_eq!(dev.base_url, "https://lims-dev.example/api/v2/");
        assert_eq!(dev.password, "hunter22");
        assert!(matches!(dev.log_level, LogLevel::Debug));
        assert_eq!(dev.lock_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(dev.http_timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS);
        assert_eq!(cfg.log_file_path(Environment::Dev).unwrap(), "./logs");

        let prod = cfg.environment(Environment::Prod).unwrap();
        assert!(matches!(prod.log_level, LogLevel::Error));
        assert_eq!(prod.lock_timeout(), None);
        assert_eq!(cfg.log_file_path(Environment::Prod).unwrap(), "/var/log/lims");
    }

    #[test]
    fn missing_environment_is_configuration_error() {
        let yaml = r#"
dev:
  clarity_url: http://localhost/
  username: u
  pass: p
  log_level: info
"#;
        let cfg = parse_config(&PathBuf::from("c.yml"), yaml).unwrap();
        let err = cfg.environment(Environment::Prod).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        // no log path anywhere
        assert!(matches!(
            cfg.log_file_path(Environment::Dev),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn malformed_and_unsupported_files_are_rejected() {
        let err = parse_config(&PathBuf::from("c.yaml"), "dev: [unclosed").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = parse_config(&PathBuf::from("c.ini"), "").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn parses_toml_with_base_url_alias() {
        let toml = r#"
log_file_path = "logs"

[dev]
base_url = "http://localhost:8080/api/v2"
username = "u"
password = "pw"
log_level = "warning"
"#;
        let cfg = parse_config(&PathBuf::from("c.toml"), toml).unwrap();
        let dev = cfg.environment(Environment::Dev).unwrap();
        assert_eq!(dev.base_url, "http://localhost:8080/api/v2");
        assert_eq!(dev.password, "pw");
        assert!(matches!(dev.log_level, LogLevel::Warn));
    }

    #[test]
    fn display_masks_password() {
        let cfg = parse_config(&PathBuf::from("config.yaml"), YAML).unwrap();
        let rendered = cfg.to_string();
        assert!(!rendered.contains("hunter22"));
        assert!(rendered.contains("h*******"));
    }

    #[tokio::test]
    async fn missing_config_file_is_configuration_error() {
        let err = read_config("/definitely/not/here/config.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
