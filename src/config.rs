use std::{fs, io, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_USER_AGENT: &str = "Reddit2TelegramBot/1.0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("missing required setting `{0}` (set it in the config file or environment)")]
    Missing(&'static str),

    #[error("invalid value for `{key}`: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Cursor file. Can be overridden from the command line.
    pub cache: Option<String>,

    /// Seconds between two polls of the subreddit.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Maximum length (in characters) of a formatted message.
    #[serde(default = "default_max_post_length")]
    pub max_post_length: usize,

    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub reddit: RedditConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RedditConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub subreddit: String,
}

fn default_check_interval() -> u64 {
    60
}

fn default_max_post_length() -> usize {
    4096
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: None,
            check_interval: default_check_interval(),
            max_post_length: default_max_post_length(),
            telegram: TelegramConfig::default(),
            reddit: RedditConfig::default(),
        }
    }
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: default_user_agent(),
            subreddit: String::new(),
        }
    }
}

impl Config {
    /// Reads config from a toml file. A missing file yields the defaults,
    /// so the whole configuration may come from the environment instead.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match fs::read(path.as_ref()) {
            Ok(bytes) => Self::parse(&String::from_utf8_lossy(&bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Overrides settings from environment-like variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str, field: &mut String| {
            if let Some(v) = lookup(key).filter(|v| !v.is_empty()) {
                *field = v;
            }
        };

        set("TELEGRAM_BOT_TOKEN", &mut self.telegram.token);
        set("TELEGRAM_CHANNEL_ID", &mut self.telegram.chat_id);
        set("REDDIT_CLIENT_ID", &mut self.reddit.client_id);
        set("REDDIT_CLIENT_SECRET", &mut self.reddit.client_secret);
        set("REDDIT_USER_AGENT", &mut self.reddit.user_agent);
        set("SUBREDDIT_NAME", &mut self.reddit.subreddit);

        if let Some(v) = lookup("CHECK_INTERVAL").filter(|v| !v.is_empty()) {
            self.check_interval = v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "CHECK_INTERVAL",
                value: v,
            })?;
        }

        Ok(())
    }

    /// Checks that every credential needed to run is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("telegram.token", &self.telegram.token),
            ("telegram.chat_id", &self.telegram.chat_id),
            ("reddit.client_id", &self.reddit.client_id),
            ("reddit.client_secret", &self.reddit.client_secret),
            ("reddit.subreddit", &self.reddit.subreddit),
        ];

        if let Some((key, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ConfigError::Missing(*key));
        }

        // room for `*x*` and the ellipsis marker
        if self.max_post_length < 16 {
            return Err(ConfigError::Invalid {
                key: "max_post_length",
                value: self.max_post_length.to_string(),
            });
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }
}
