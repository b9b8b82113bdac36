// Configuration management for the ghostlink CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/ghostlink/config.json
// - Linux: ~/.config/ghostlink/config.json
// - Windows: %APPDATA%\ghostlink\config.json

use anyhow::{Context, Result};
use ghostlink_core::{DmPolicy, PrivacyPolicy, SessionSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name shown to other peers
    pub nickname: String,

    /// Avatar reference shown to other peers
    pub avatar_ref: Option<String>,

    /// Directory multiaddr, including `/p2p/<peer-id>`
    pub directory: Option<String>,

    /// Port for direct inbound channels (0 = random)
    pub listen_port: u16,

    /// Hide our address behind the directory's relay
    pub anonymize: bool,

    /// Accept incoming calls
    pub allow_calls: bool,

    /// Who may start a direct conversation
    pub dm_policy: DmPolicy,

    /// Connect timeout in seconds
    pub connection_timeout: u64,

    /// Write logs here instead of stderr
    pub log_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nickname: "anonymous".to_string(),
            avatar_ref: None,
            directory: None,
            listen_port: 0,
            anonymize: false,
            allow_calls: true,
            dm_policy: DmPolicy::Everyone,
            connection_timeout: 30,
            log_file: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("ghostlink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("ghostlink");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Load config from `path`, or create the default there if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value. Call `save` to persist it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "nickname" => {
                if value.trim().is_empty() {
                    anyhow::bail!("Nickname cannot be empty");
                }
                self.nickname = value.trim().to_string();
            }
            "avatar_ref" => self.avatar_ref = optional(value),
            "directory" => {
                if !value.is_empty() {
                    value
                        .parse::<libp2p::Multiaddr>()
                        .context("Invalid multiaddr")?;
                }
                self.directory = optional(value);
            }
            "listen_port" => {
                self.listen_port = value.parse().context("Invalid port number")?;
            }
            "anonymize" => {
                self.anonymize = value.parse().context("Invalid boolean value")?;
            }
            "allow_calls" => {
                self.allow_calls = value.parse().context("Invalid boolean value")?;
            }
            "dm_policy" => {
                self.dm_policy = value.parse().map_err(anyhow::Error::msg)?;
            }
            "connection_timeout" => {
                let seconds: u64 = value.parse().context("Invalid number")?;
                if seconds == 0 {
                    anyhow::bail!("Timeout must be at least one second");
                }
                self.connection_timeout = seconds;
            }
            "log_file" => self.log_file = optional(value),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "nickname" => Some(self.nickname.clone()),
            "avatar_ref" => self.avatar_ref.clone(),
            "directory" => self.directory.clone(),
            "listen_port" => Some(self.listen_port.to_string()),
            "anonymize" => Some(self.anonymize.to_string()),
            "allow_calls" => Some(self.allow_calls.to_string()),
            "dm_policy" => Some(self.dm_policy.to_string()),
            "connection_timeout" => Some(self.connection_timeout.to_string()),
            "log_file" => self.log_file.clone(),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let unset = || "(none)".to_string();
        vec![
            ("nickname".to_string(), self.nickname.clone()),
            ("avatar_ref".to_string(), self.avatar_ref.clone().unwrap_or_else(unset)),
            ("directory".to_string(), self.directory.clone().unwrap_or_else(unset)),
            ("listen_port".to_string(), self.listen_port.to_string()),
            ("anonymize".to_string(), self.anonymize.to_string()),
            ("allow_calls".to_string(), self.allow_calls.to_string()),
            ("dm_policy".to_string(), self.dm_policy.to_string()),
            ("connection_timeout".to_string(), format!("{}s", self.connection_timeout)),
            ("log_file".to_string(), self.log_file.clone().unwrap_or_else(unset)),
        ]
    }

    pub fn privacy(&self) -> PrivacyPolicy {
        PrivacyPolicy {
            allow_calls: self.allow_calls,
            dm_policy: self.dm_policy,
        }
    }

    /// Session settings for `ghostlink start`
    pub fn session_settings(&self) -> SessionSettings {
        let mut settings = SessionSettings::new(self.nickname.clone());
        settings.avatar_ref = self.avatar_ref.clone();
        settings.anonymize = self.anonymize;
        settings.privacy = self.privacy();
        settings.connect_timeout = Some(Duration::from_secs(self.connection_timeout));
        settings
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_port, 0);
        assert_eq!(config.connection_timeout, 30);
        assert!(config.allow_calls);
        assert!(!config.anonymize);
        assert!(config.session_settings().validate().is_ok());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_set_save_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::load_from(&path).unwrap();
        config.set("nickname", "alice").unwrap();
        config.set("dm_policy", "contacts").unwrap();
        config.set("allow_calls", "false").unwrap();
        config.set("connection_timeout", "5").unwrap();
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.get("nickname").as_deref(), Some("alice"));
        assert_eq!(reloaded.get("dm_policy").as_deref(), Some("contacts"));

        let settings = reloaded.session_settings();
        assert_eq!(settings.nickname, "alice");
        assert_eq!(settings.privacy.dm_policy, DmPolicy::ContactsOnly);
        assert!(!settings.privacy.allow_calls);
        assert_eq!(settings.connect_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "nickname": "bob" }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.nickname, "bob");
        assert_eq!(config.connection_timeout, 30);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        assert!(config.set("listen_port", "not-a-port").is_err());
        assert!(config.set("dm_policy", "friends").is_err());
        assert!(config.set("connection_timeout", "0").is_err());
        assert!(config.set("nickname", "  ").is_err());
        assert!(config.set("directory", "not a multiaddr").is_err());
        assert!(config.set("bogus", "1").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_value_clears_optional() {
        let mut config = Config::default();
        config.set("log_file", "/tmp/ghostlink.log").unwrap();
        assert_eq!(config.get("log_file").as_deref(), Some("/tmp/ghostlink.log"));
        config.set("log_file", "").unwrap();
        assert_eq!(config.get("log_file"), None);
    }
}
