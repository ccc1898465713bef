//! Bot configuration
//!
//! Loaded once at startup from YAML and shared read-only afterwards.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default location of the configuration file
pub const CONFIG_FILE: &str = "config/link_config.yaml";

/// Longest expiry sweep period, one week
const MAX_EXPIRY_CHECK_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Message text given either as one string or as a list of lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageTemplate {
    Line(String),
    Lines(Vec<String>),
}

impl MessageTemplate {
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Line(line) => line.clone(),
            Self::Lines(lines) => lines.join("\n"),
        }
    }
}

impl From<&str> for MessageTemplate {
    fn from(line: &str) -> Self {
        Self::Line(line.to_string())
    }
}

/// In-channel warning shown when a punished member tries to talk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningMessages {
    pub ban: MessageTemplate,
    pub mute: MessageTemplate,
}

impl Default for WarningMessages {
    fn default() -> Self {
        let text: MessageTemplate =
            "⛔ You cannot send messages because you are punished on the game server.".into();
        Self {
            ban: text.clone(),
            mute: text,
        }
    }
}

/// Direct messages sent when a punishment is issued
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationMessages {
    pub ban: MessageTemplate,
    pub mute: MessageTemplate,
    pub warn: MessageTemplate,
}

impl Default for NotificationMessages {
    fn default() -> Self {
        Self {
            ban: MessageTemplate::Lines(vec![
                "You have been banned on the game server as {player}.".to_string(),
                "Reason: {reason}".to_string(),
                "Duration: {time}".to_string(),
            ]),
            mute: MessageTemplate::Lines(vec![
                "You have been muted on the game server as {player}.".to_string(),
                "Reason: {reason}".to_string(),
                "Duration: {time}".to_string(),
            ]),
            warn: MessageTemplate::Lines(vec![
                "You have been warned on the game server as {player}.".to_string(),
                "Reason: {reason}".to_string(),
            ]),
        }
    }
}

/// A single audit-channel message type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub message: MessageTemplate,
}

fn enabled() -> bool {
    true
}

impl ChannelMessage {
    fn new(message: &str) -> Self {
        Self {
            enabled: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogChannelMessages {
    pub role_applied: ChannelMessage,
    pub role_removed: ChannelMessage,
    pub punishment_expired: ChannelMessage,
}

impl Default for LogChannelMessages {
    fn default() -> Self {
        Self {
            role_applied: ChannelMessage::new(
                "🔇 {discord-user} ({player}) received {punished-role} for a {type}. Reason: {reason}. Duration: {duration}",
            ),
            role_removed: ChannelMessage::new(
                "🔊 {punished-role} removed from {discord-user} ({player}), {type} lifted.",
            ),
            punishment_expired: ChannelMessage::new(
                "⌛ {type} of {discord-user} ({player}) expired, {punished-role} removed.",
            ),
        }
    }
}

/// Discord channel that mirrors enforcement actions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogChannelConfig {
    pub enabled: bool,
    pub channel_id: u64,
    pub messages: LogChannelMessages,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/punishments.db".to_string(),
        }
    }
}

/// Where the game server's LiteBans data lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// LiteBans SQLite database, opened read-only
    pub database: String,
    pub table_prefix: String,
    pub poll_interval_seconds: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database: "plugins/LiteBans/litebans.db".to_string(),
            table_prefix: "litebans_".to_string(),
            poll_interval_seconds: 5,
        }
    }
}

/// Audit file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditLogConfig {
    pub enabled: bool,
    pub directory: String,
    pub filename: String,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: "logs".to_string(),
            filename: "punishments.log".to_string(),
        }
    }
}

/// Complete bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// The single community guild punishments are mirrored to
    pub guild_id: u64,
    /// Role given to punished members, `0` or absent for none
    pub muted_role_id: Option<u64>,
    /// Server-mute punished members in voice channels
    pub apply_server_mute: bool,
    pub expiry_check_interval_minutes: u64,
    pub debug: bool,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub links_file: String,
    /// How long the in-channel warning stays before it is deleted
    pub warning_delete_after_seconds: u64,
    pub messages: WarningMessages,
    pub notification_messages: NotificationMessages,
    pub log_channel: LogChannelConfig,
    pub logging: AuditLogConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            muted_role_id: None,
            apply_server_mute: true,
            expiry_check_interval_minutes: 5,
            debug: false,
            database: DatabaseConfig::default(),
            ledger: LedgerConfig::default(),
            links_file: "data/linked_accounts.yaml".to_string(),
            warning_delete_after_seconds: 10,
            messages: WarningMessages::default(),
            notification_messages: NotificationMessages::default(),
            log_channel: LogChannelConfig::default(),
            logging: AuditLogConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Load configuration from a YAML file
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from YAML text
    ///
    /// # Errors
    /// Returns an error if the text is not valid configuration YAML.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Restriction role, if one is configured
    #[must_use]
    pub fn muted_role(&self) -> Option<u64> {
        self.muted_role_id.filter(|id| *id != 0)
    }

    /// Audit channel, if channel logging is switched on and a channel is set
    #[must_use]
    pub fn log_channel_id(&self) -> Option<u64> {
        (self.log_channel.enabled && self.log_channel.channel_id != 0)
            .then_some(self.log_channel.channel_id)
    }

    /// Period of the expiry sweep, between a minute and a week
    #[must_use]
    pub fn expiry_check_interval(&self) -> Duration {
        let minutes = self
            .expiry_check_interval_minutes
            .clamp(1, MAX_EXPIRY_CHECK_MINUTES);
        Duration::from_secs(minutes.saturating_mul(60))
    }

    /// How often the ledger is polled for changes, at least once a second
    #[must_use]
    pub fn ledger_poll_interval(&self) -> Duration {
        Duration::from_secs(self.ledger.poll_interval_seconds.max(1))
    }

    #[must_use]
    pub fn warning_delete_after(&self) -> Duration {
        Duration::from_secs(self.warning_delete_after_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.muted_role(), None);
        assert!(config.apply_server_mute);
        assert_eq!(config.expiry_check_interval(), Duration::from_secs(300));
        assert_eq!(config.log_channel_id(), None);
        assert_eq!(config.warning_delete_after(), Duration::from_secs(10));
        assert!(config.logging.enabled);
        assert_eq!(config.logging.filename, "punishments.log");
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
guild_id: 1234
muted_role_id: 5678
apply_server_mute: false
expiry_check_interval_minutes: 1
ledger:
  database: "/srv/minecraft/plugins/LiteBans/litebans.db"
messages:
  mute:
    - "You are muted."
    - "Reason: {reason}"
log_channel:
  enabled: true
  channel_id: 999
  messages:
    role_removed:
      enabled: false
      message: "gone"
"#;
        let config = LinkConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.guild_id, 1234);
        assert_eq!(config.muted_role(), Some(5678));
        assert!(!config.apply_server_mute);
        assert_eq!(config.expiry_check_interval(), Duration::from_secs(60));
        assert_eq!(config.messages.mute.text(), "You are muted.\nReason: {reason}");
        assert_eq!(
            config.messages.ban,
            WarningMessages::default().ban,
            "unset template keeps its default"
        );
        assert_eq!(config.log_channel_id(), Some(999));
        assert!(!config.log_channel.messages.role_removed.enabled);
        assert!(config.log_channel.messages.role_applied.enabled);
        assert_eq!(config.database.path, "data/punishments.db");
        assert_eq!(config.ledger.database, "/srv/minecraft/plugins/LiteBans/litebans.db");
        assert_eq!(config.ledger.table_prefix, "litebans_");
        assert_eq!(config.ledger_poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_ids_mean_unset() {
        let config = LinkConfig::from_yaml(
            "muted_role_id: 0\nexpiry_check_interval_minutes: 0\nlog_channel:\n  enabled: true\n  channel_id: 0\n",
        )
        .unwrap();

        assert_eq!(config.muted_role(), None);
        assert_eq!(config.log_channel_id(), None);
        assert_eq!(config.expiry_check_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_expiry_check_interval_is_bounded() {
        let mut config = LinkConfig::default();
        config.expiry_check_interval_minutes = 0;
        assert_eq!(config.expiry_check_interval(), Duration::from_secs(60));

        config.expiry_check_interval_minutes = u64::MAX;
        assert_eq!(
            config.expiry_check_interval(),
            Duration::from_secs(7 * 24 * 60 * 60)
        );
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(matches!(
            LinkConfig::from_yaml("guild_id: [not a number"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(LinkConfig::from_yaml("   \n").is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LinkConfig::load(dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(config.guild_id, 0);
    }
}
