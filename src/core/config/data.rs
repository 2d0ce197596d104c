use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::window::{NewMessagePolicy, WindowLimits};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_PROFILE_PATH: &str = "profile.json";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_MAX_TOKENS: usize = 4000;
pub const DEFAULT_MAX_HISTORY_ITEMS: usize = 20;
pub const DEFAULT_MAX_RESPONSE_TOKENS: usize = 2000;
pub const DEFAULT_CHUNK_CHARS: usize = 10_000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// On-disk configuration. Every field is optional; unset fields resolve to
/// the defaults above.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base URL of an OpenAI-compatible API (e.g., "https://api.deepseek.com/v1")
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Location of the profile JSON file
    pub profile_path: Option<PathBuf>,
    /// Root directory for transcripts and training snapshots
    pub data_dir: Option<PathBuf>,
    /// Token ceiling for one request (history + system prompt + new message)
    pub max_tokens: Option<usize>,
    pub max_history_items: Option<usize>,
    /// Upper bound for the `max_tokens` request parameter
    pub max_response_tokens: Option<usize>,
    /// Transcripts longer than this many characters are split into parts
    pub chunk_chars: Option<usize>,
    pub connect_timeout_secs: Option<u64>,
    /// Abort a stream when no bytes arrive for this long
    pub idle_timeout_secs: Option<u64>,
    pub new_message_policy: Option<NewMessagePolicy>,
}

/// Values supplied on the command line; they win over the config file.
#[derive(Debug, Default, Clone)]
pub struct SettingsOverrides {
    pub model: Option<String>,
    pub profile_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

/// Fully resolved runtime settings, built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub base_url: String,
    pub model: String,
    pub profile_path: PathBuf,
    pub data_dir: PathBuf,
    pub window: WindowLimits,
    pub max_response_tokens: usize,
    pub chunk_chars: usize,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Config::default().resolve(&SettingsOverrides::default())
    }
}

impl Config {
    pub fn resolve(&self, overrides: &SettingsOverrides) -> Settings {
        Settings {
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: overrides
                .model
                .clone()
                .or_else(|| self.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            profile_path: overrides
                .profile_path
                .clone()
                .or_else(|| self.profile_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILE_PATH)),
            data_dir: overrides
                .data_dir
                .clone()
                .or_else(|| self.data_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            window: WindowLimits {
                max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                max_history_items: self.max_history_items.unwrap_or(DEFAULT_MAX_HISTORY_ITEMS),
                new_message_policy: self.new_message_policy.unwrap_or_default(),
            },
            max_response_tokens: self
                .max_response_tokens
                .unwrap_or(DEFAULT_MAX_RESPONSE_TOKENS),
            chunk_chars: self.chunk_chars.unwrap_or(DEFAULT_CHUNK_CHARS).max(1),
            connect_timeout: Duration::from_secs(
                self.connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            idle_timeout: Duration::from_secs(
                self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            ),
        }
    }

    /// Set a value by its CLI key name.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "base-url" => self.base_url = Some(value.to_string()),
            "model" => self.model = Some(value.to_string()),
            "profile-path" => self.profile_path = Some(PathBuf::from(value)),
            "data-dir" => self.data_dir = Some(PathBuf::from(value)),
            "max-tokens" => self.max_tokens = Some(parse_number(key, value)?),
            "max-history-items" => self.max_history_items = Some(parse_number(key, value)?),
            "max-response-tokens" => self.max_response_tokens = Some(parse_number(key, value)?),
            "chunk-chars" => {
                let chars: usize = parse_number(key, value)?;
                if chars == 0 {
                    return Err("chunk-chars must be at least 1".to_string());
                }
                self.chunk_chars = Some(chars);
            }
            "connect-timeout" => self.connect_timeout_secs = Some(parse_number(key, value)?),
            "idle-timeout" => self.idle_timeout_secs = Some(parse_number(key, value)?),
            "new-message-policy" => self.new_message_policy = Some(value.parse()?),
            _ => return Err(format!("Unknown config key: {key}")),
        }
        Ok(())
    }

    pub fn unset_value(&mut self, key: &str) -> Result<(), String> {
        match key {
            "base-url" => self.base_url = None,
            "model" => self.model = None,
            "profile-path" => self.profile_path = None,
            "data-dir" => self.data_dir = None,
            "max-tokens" => self.max_tokens = None,
            "max-history-items" => self.max_history_items = None,
            "max-response-tokens" => self.max_response_tokens = None,
            "chunk-chars" => self.chunk_chars = None,
            "connect-timeout" => self.connect_timeout_secs = None,
            "idle-timeout" => self.idle_timeout_secs = None,
            "new-message-policy" => self.new_message_policy = None,
            _ => return Err(format!("Unknown config key: {key}")),
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("{key} expects a non-negative integer, got '{value}'"))
}

pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
