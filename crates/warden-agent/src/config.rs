use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use chrono::NaiveTime;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "warden.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub backups: BackupConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Working directory of the server process.
    pub dir: PathBuf,
    /// Wrapper script that launches the server. When unset, `java` is invoked directly.
    #[serde(default)]
    pub launcher: Option<PathBuf>,
    #[serde(default = "default_jar")]
    pub jar: PathBuf,
    #[serde(default = "default_memory_gb")]
    pub min_memory_gb: u32,
    #[serde(default = "default_memory_gb")]
    pub max_memory_gb: u32,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_fatal_exit_delay_secs")]
    pub fatal_exit_delay_secs: u64,
    #[serde(default = "default_restart_warning")]
    pub restart_warning: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Daily backup time, `HH:MM` in local time.
    #[serde(default = "default_backup_time")]
    pub time: String,
    pub sources: Vec<PathBuf>,
    pub dir: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Pause before compression so it does not compete with server start-up.
    #[serde(default = "default_post_backup_delay_secs")]
    pub post_backup_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_receiver_host")]
    pub host: String,
    #[serde(default = "default_receiver_port")]
    pub port: u16,
    #[serde(default)]
    pub token: String,
    /// Retries after the first attempt.
    #[serde(default = "default_send_attempts")]
    pub attempts: u32,
    #[serde(default = "default_transfer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub require_success_status: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_notification_delay_secs")]
    pub delay_secs: u64,
    #[serde(default)]
    pub messages: PathBuf,
    #[serde(default)]
    pub users: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_jar() -> PathBuf {
    PathBuf::from("server.jar")
}

fn default_memory_gb() -> u32 {
    6
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_stop_timeout_secs() -> u64 {
    60
}

fn default_fatal_exit_delay_secs() -> u64 {
    10
}

fn default_restart_warning() -> String {
    "Server is restarting, 5 minutes max...".to_string()
}

fn default_backup_time() -> String {
    "07:00".to_string()
}

fn default_retention_days() -> u32 {
    5
}

fn default_post_backup_delay_secs() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

fn default_receiver_host() -> String {
    "127.0.0.1".to_string()
}

fn default_receiver_port() -> u16 {
    8123
}

fn default_send_attempts() -> u32 {
    5
}

fn default_transfer_timeout_secs() -> u64 {
    30 * 60
}

fn default_notification_delay_secs() -> u64 {
    5
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_receiver_host(),
            port: default_receiver_port(),
            token: String::new(),
            attempts: default_send_attempts(),
            timeout_secs: default_transfer_timeout_secs(),
            require_success_status: false,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_secs: default_notification_delay_secs(),
            messages: PathBuf::new(),
            users: PathBuf::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

impl ServerConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn fatal_exit_delay(&self) -> Duration {
        Duration::from_secs(self.fatal_exit_delay_secs)
    }
}

impl BackupConfig {
    pub fn backup_time(&self) -> anyhow::Result<NaiveTime> {
        parse_backup_time(&self.time)
    }

    pub fn post_backup_delay(&self) -> Duration {
        Duration::from_secs(self.post_backup_delay_secs)
    }
}

impl TransferConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl NotificationConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

pub fn parse_backup_time(raw: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| anyhow::anyhow!("backups.time must be HH:MM (24h), got {raw:?}"))
}

pub fn config_path() -> PathBuf {
    std::env::var_os("WARDEN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Checks everything the supervisor relies on and reports every problem at once.
    ///
    /// Notification files that are missing only disable notifications.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        let mut problems = Vec::<String>::new();

        if let Err(e) = self.backups.backup_time() {
            problems.push(e.to_string());
        }

        if !self.server.dir.is_dir() {
            problems.push(format!(
                "server.dir {} is not a directory",
                self.server.dir.display()
            ));
        }

        match &self.server.launcher {
            Some(launcher) => {
                if !launcher.is_file() {
                    problems.push(format!(
                        "server.launcher {} does not exist",
                        launcher.display()
                    ));
                }
            }
            None => {
                let jar = self.server.dir.join(&self.server.jar);
                if !jar.is_file() {
                    problems.push(format!("server.jar {} does not exist", jar.display()));
                }
                if self.server.min_memory_gb == 0 || self.server.max_memory_gb == 0 {
                    problems.push(
                        "server.min_memory_gb and server.max_memory_gb are required without a launcher"
                            .to_string(),
                    );
                } else if self.server.min_memory_gb > self.server.max_memory_gb {
                    problems.push(format!(
                        "server.min_memory_gb ({}) exceeds server.max_memory_gb ({})",
                        self.server.min_memory_gb, self.server.max_memory_gb
                    ));
                }
            }
        }

        if self.backups.sources.is_empty() {
            problems.push("backups.sources is empty".to_string());
        }
        for source in &self.backups.sources {
            if !source.exists() {
                problems.push(format!("backups.sources entry {} does not exist", source.display()));
            }
        }

        if let Err(e) = std::fs::create_dir_all(&self.backups.dir) {
            problems.push(format!(
                "backups.dir {} is not usable: {e}",
                self.backups.dir.display()
            ));
        }

        if self.transfer.enabled && self.transfer.token.trim().is_empty() {
            problems.push("transfer.token is required when transfer is enabled".to_string());
        }

        if self.notifications.enabled {
            let messages_ok = self.notifications.messages.is_file();
            let users_ok = self.notifications.users.is_file();
            if !(messages_ok && users_ok) {
                tracing::warn!(
                    messages_ok,
                    users_ok,
                    "notification files are missing; notifications disabled"
                );
                self.notifications.enabled = false;
            }
        }

        if !problems.is_empty() {
            anyhow::bail!("invalid configuration:\n  - {}", problems.join("\n  - "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_dir_for(test_name: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "warden-agent-config-{test_name}-{}-{n}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn minimal(dir: &Path) -> String {
        format!(
            r#"
[server]
dir = "{root}"

[backups]
sources = ["{root}/world"]
dir = "{root}/backups"

[transfer]
token = "secret"
"#,
            root = dir.display()
        )
    }

    #[test]
    fn defaults_are_applied() {
        let dir = temp_dir_for("defaults");
        let cfg = Config::parse(&minimal(&dir)).unwrap();

        assert_eq!(cfg.backups.time, "07:00");
        assert_eq!(cfg.backups.retention_days, 5);
        assert_eq!(cfg.backups.post_backup_delay_secs, 180);
        assert_eq!(cfg.transfer.attempts, 5);
        assert_eq!(cfg.transfer.url(), "http://127.0.0.1:8123/");
        assert_eq!(cfg.transfer.timeout(), Duration::from_secs(1800));
        assert!(!cfg.transfer.require_success_status);
        assert_eq!(cfg.server.stop_grace(), Duration::from_secs(10));
        assert_eq!(cfg.server.stop_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.notifications.delay(), Duration::from_secs(5));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn validate_collects_every_problem() {
        let dir = temp_dir_for("validate-all");
        let raw = format!(
            r#"
[server]
dir = "{root}/missing-server"

[backups]
time = "25:99"
sources = ["{root}/nope-a", "{root}/nope-b"]
dir = "{root}/backups"
"#,
            root = dir.display()
        );
        let mut cfg = Config::parse(&raw).unwrap();
        let msg = cfg.validate().unwrap_err().to_string();

        assert!(msg.contains("backups.time"));
        assert!(msg.contains("missing-server"));
        assert!(msg.contains("nope-a"));
        assert!(msg.contains("nope-b"));
        assert!(msg.contains("transfer.token"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn validate_disables_notifications_without_files() {
        let dir = temp_dir_for("validate-notify");
        std::fs::create_dir_all(dir.join("world")).unwrap();
        std::fs::write(dir.join("server.jar"), b"jar").unwrap();

        let mut cfg = Config::parse(&minimal(&dir)).unwrap();
        cfg.validate().unwrap();

        assert!(!cfg.notifications.enabled);
        assert!(dir.join("backups").is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn example_config_parses() {
        let cfg = Config::parse(include_str!("../../../warden.toml.example")).unwrap();
        assert_eq!(cfg.backups.sources.len(), 3);
        assert!(cfg.server.launcher.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = "[server]\ndir = \"/srv\"\nport = 1\n[backups]\nsources = []\ndir = \"/b\"\n";
        assert!(Config::parse(raw).is_err());
    }

    #[test]
    fn backup_time_parsing() {
        assert_eq!(
            parse_backup_time("03:00").unwrap(),
            NaiveTime::from_hms_opt(3, 0, 0).unwrap()
        );
        assert!(parse_backup_time("3pm").is_err());
    }
}
