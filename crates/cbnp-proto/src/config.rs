use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

pub const ENV_ENDPOINT: &str = "CBNP_ENDPOINT";
pub const ENV_TOKEN: &str = "CBNP_TOKEN";
pub const ENV_INTERVAL: &str = "CBNP_INTERVAL";

/// Upper bound for every `*_secs` setting (one day).
pub const MAX_SECS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub artwork: ArtworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    /// `ws://` or `wss://` address of the subscriber.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Static bearer token sent as `auth` on every update.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub media_player: MediaPlayer,
    /// Bound for one media-source fetch and for one worker handoff.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtworkConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Image used when a track has no usable artwork.  Built-in image if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_path: Option<PathBuf>,
}

/// Player application the media source talks to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaPlayer {
    #[default]
    Music,
    Spotify,
}

impl MediaPlayer {
    /// Application name as scripting sees it.
    pub fn app_name(&self) -> &'static str {
        match self {
            MediaPlayer::Music => "Music",
            MediaPlayer::Spotify => "Spotify",
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            media_player: MediaPlayer::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            default_path: None,
        }
    }
}

fn default_endpoint() -> String {
    "ws://127.0.0.1:8765".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    4
}

fn default_interval_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Load from the default path, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Parse and validate a config file.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let endpoint = self.publisher.endpoint.trim();
        let host = endpoint
            .strip_prefix("ws://")
            .or_else(|| endpoint.strip_prefix("wss://"));
        match host {
            None => anyhow::bail!(
                "publisher.endpoint must be a ws:// or wss:// URI, got {:?}",
                endpoint
            ),
            Some(rest) if rest.is_empty() => anyhow::bail!("publisher.endpoint has no host"),
            Some(_) => {}
        }
        let seconds = [
            ("polling.interval_secs", self.polling.interval_secs),
            ("polling.request_timeout_secs", self.polling.request_timeout_secs),
            ("publisher.connect_timeout_secs", self.publisher.connect_timeout_secs),
            ("artwork.fetch_timeout_secs", self.artwork.fetch_timeout_secs),
        ];
        for (name, value) in seconds {
            if !(1..=MAX_SECS).contains(&value) {
                anyhow::bail!("{} must be between 1 and {}, got {}", name, MAX_SECS, value);
            }
        }
        Ok(())
    }

    /// Apply `CBNP_*` overrides from `lookup` (normally `std::env::var`).
    /// Values that would make the config invalid are skipped with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            let previous = std::mem::replace(&mut self.publisher.endpoint, endpoint);
            if let Err(e) = self.validate() {
                tracing::warn!("Ignoring {}: {}", ENV_ENDPOINT, e);
                self.publisher.endpoint = previous;
            }
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            self.publisher.token = token;
        }
        if let Some(interval) = lookup(ENV_INTERVAL) {
            match interval.trim().parse::<u64>() {
                Ok(secs) if (1..=MAX_SECS).contains(&secs) => self.polling.interval_secs = secs,
                _ => tracing::warn!("Ignoring {}: invalid interval {:?}", ENV_INTERVAL, interval),
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.polling.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.publisher.connect_timeout_secs)
    }

    pub fn artwork_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.artwork.fetch_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            publisher: PublisherConfig::default(),
            polling: PollingConfig::default(),
            artwork: ArtworkConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.publisher.endpoint, "ws://127.0.0.1:8765");
        assert_eq!(config.polling.interval_secs, 5);
        assert_eq!(config.polling.media_player, MediaPlayer::Music);
        assert!(config.validate().is_ok());
        assert!(Config::config_path().ends_with("cbnp/config.toml"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [publisher]
            endpoint = "wss://np.example.net/feed"
            token = "abc"

            [polling]
            media_player = "spotify"
            "#,
        )
        .unwrap();
        assert_eq!(config.publisher.endpoint, "wss://np.example.net/feed");
        assert_eq!(config.publisher.token, "abc");
        assert_eq!(config.polling.media_player, MediaPlayer::Spotify);
        assert_eq!(config.polling.interval_secs, 5);
        assert_eq!(config.artwork.default_path, None);
    }

    #[test]
    fn test_validation_rejects_bad_records() {
        let mut config = Config::default();
        config.publisher.endpoint = "http://127.0.0.1:8765".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.publisher.endpoint = "ws://".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.polling.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.polling.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_durations() {
        let mut config = Config::default();
        config.polling.interval_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.polling.request_timeout_secs = MAX_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.publisher.connect_timeout_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.artwork.fetch_timeout_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.polling.interval_secs = MAX_SECS;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.apply_overrides(|k| (k == ENV_INTERVAL).then(|| u64::MAX.to_string()));
        assert_eq!(config.polling.interval_secs, 5);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.publisher.token = "tok".into();
        config.polling.interval_secs = 9;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::write(&path, "[polling]\ninterval_secs = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ENDPOINT, "wss://relay.local:9000"),
            (ENV_TOKEN, "from-env"),
            (ENV_INTERVAL, "3"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.publisher.endpoint, "wss://relay.local:9000");
        assert_eq!(config.publisher.token, "from-env");
        assert_eq!(config.polling.interval_secs, 3);
    }

    #[test]
    fn test_invalid_overrides_are_ignored() {
        let env: HashMap<&str, &str> =
            [(ENV_ENDPOINT, "ftp://nope"), (ENV_INTERVAL, "0")].into_iter().collect();
        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config, Config::default());
    }
}
