use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },

    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub uptime: UptimeConfig,
    pub alerts: AlertConfig,
    pub database: DatabaseConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between two ticks
    pub tick_interval_secs: u64,
    /// Probe timeout for monitors that carry no timeout of their own
    pub default_timeout_ms: u64,
    /// Upper bound on concurrently running monitor cycles per tick
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UptimeConfig {
    pub window_hours: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Also notify when an alerted monitor comes back up
    pub notify_on_recovery: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    Log,
    Webhook,
}

impl fmt::Display for NotifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifierKind::Log => write!(f, "log"),
            NotifierKind::Webhook => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_interval_secs: 60, default_timeout_ms: 5_000, max_concurrency: 32 }
    }
}

impl Default for UptimeConfig {
    fn default() -> Self {
        Self { window_hours: 24, max_entries: 1440 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "uptime.db".into(), max_connections: 8 }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { kind: NotifierKind::Log, webhook_url: None, timeout_secs: 10 }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl UptimeConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.window_hours as i64)
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uptime/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("uptime/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Configuration:")?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Tick Interval (s)", &self.scheduler.tick_interval_secs)?;
        write_1(f, "Default Timeout (ms)", &self.scheduler.default_timeout_ms)?;
        write_1(f, "Max Concurrency", &self.scheduler.max_concurrency)?;
        write_title_1(f, "Uptime Window")?;
        write_1(f, "Hours", &self.uptime.window_hours)?;
        write_1(f, "Max Entries", &self.uptime.max_entries)?;
        write_title_1(f, "Alerts")?;
        write_1(f, "Notify On Recovery", &self.alerts.notify_on_recovery)?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Max Connections", &self.database.max_connections)?;
        write_title_1(f, "Notifier")?;
        write_1(f, "Kind", &self.notifier.kind)?;
        write_1(f, "Webhook URL", &self.notifier.webhook_url.as_deref().unwrap_or("-"))?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uptime/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// # use uptime_service::config::Config;
    /// let cfg = Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), uptime_service::config::ConfigError>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("scheduler.tick_interval_secs must be positive".into()));
        }
        if self.scheduler.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.default_timeout_ms must be positive".into()));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(ConfigError::Invalid("scheduler.max_concurrency must be positive".into()));
        }
        if self.uptime.window_hours == 0 || self.uptime.max_entries == 0 {
            return Err(ConfigError::Invalid("uptime window must be non-empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be positive".into()));
        }
        if self.notifier.kind == NotifierKind::Webhook {
            let url = self.notifier.webhook_url.as_deref().ok_or_else(|| {
                ConfigError::Invalid("notifier.webhook_url is required for the webhook notifier".into())
            })?;
            url::Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("notifier.webhook_url: {e}")))?;
        }
        Ok(())
    }
}
