//! Credentials and optional settings.
//!
//! Credentials always come from the environment. Everything else has a
//! built-in default and may be overridden from a TOML file found at
//! `--config`, `./whodis.toml`, or `<config dir>/whodis/config.toml`.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_USER_AGENT: &str = "script:reddit-who-dis:v1.0";

const REQUIRED_ENV_VARS: [&str; 3] = ["REDDIT_CLIENT_ID", "REDDIT_CLIENT_SECRET", "GOOGLE_API_KEY"];

#[derive(Debug, Clone)]
pub struct Credentials {
    pub reddit_client_id: String,
    pub reddit_client_secret: String,
    pub reddit_user_agent: Option<String>,
    pub google_api_key: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reports every missing variable at once rather than the first one.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let missing: Vec<&str> = REQUIRED_ENV_VARS
            .iter()
            .copied()
            .filter(|name| get(*name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingEnvironmentVariable {
                var_name: missing.join(", "),
            });
        }

        Ok(Self {
            reddit_client_id: get("REDDIT_CLIENT_ID").unwrap_or_default(),
            reddit_client_secret: get("REDDIT_CLIENT_SECRET").unwrap_or_default(),
            reddit_user_agent: get("REDDIT_USER_AGENT"),
            google_api_key: get("GOOGLE_API_KEY").unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub dir: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cache"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".into(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".into(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub summary_words: usize,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8880/v1".into(),
            model: "kokoro".into(),
            voice: "af_sky+af_bella".into(),
            summary_words: 350,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedditSettings {
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub llm: LlmSettings,
    pub tts: TtsSettings,
    pub reddit: RedditSettings,
}

impl Settings {
    /// Load settings from `path`, or from the first file found on the
    /// search path. No file at all means defaults; an explicit path that
    /// does not exist, or a file that fails to parse, is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                });
            }
            return Self::from_file(path);
        }

        let candidates = [
            std::env::current_dir().ok().map(|d| d.join("whodis.toml")),
            dirs::config_dir().map(|d| d.join("whodis").join("config.toml")),
        ];
        match candidates.into_iter().flatten().find(|p| p.exists()) {
            Some(found) => Self::from_file(&found),
            None => {
                debug!("No settings file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFormat {
                details: format!("{}: {}", path.display(), e),
            })?;
        let settings = Self::from_toml(&contents)?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// `REDDIT_USER_AGENT` wins over the settings file, which wins over the
    /// built-in default.
    pub fn user_agent(&self, credentials: &Credentials) -> String {
        credentials
            .reddit_user_agent
            .clone()
            .or_else(|| self.reddit.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}
