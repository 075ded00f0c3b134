//! Settings resolution.
//!
//! Every setting is looked up in the secrets file first, then in the process
//! environment, then falls back to a built-in literal. Resolution never fails;
//! each [`Setting`] remembers which of the three paths produced its value.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

use crate::provider::Provider;

pub const OLLAMA_BASE_URL: &str = "OLLAMA_BASE_URL";
pub const DEFAULT_MODEL: &str = "DEFAULT_MODEL";
pub const PAGE_TITLE: &str = "PAGE_TITLE";
pub const APP_NAME: &str = "APP_NAME";
pub const API_STYLE: &str = "API_STYLE";
pub const SYSTEM_PROMPT: &str = "SYSTEM_PROMPT";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const HISTORY_LIMIT: &str = "HISTORY_LIMIT";

/// Environment variable naming an explicit secrets file.
pub const SECRETS_FILE_ENV: &str = "FLASQ_SECRETS_FILE";

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL_NAME: &str = "llama3.2:1b";
const DEFAULT_PAGE_TITLE: &str = "Flasq AI Assistant";
const DEFAULT_APP_NAME: &str = "Flasq";
const DEFAULT_SYSTEM_PROMPT: &str = "You are Flasq, a helpful and professional AI assistant \
specialized in coding and programming languages. Provide clear, concise, and accurate responses. \
When helping with code, include explanations and best practices.";

/// Where a setting's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingSource {
    Secrets,
    Environment,
    Default,
}

/// A resolved setting value together with its resolution path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub value: String,
    pub source: SettingSource,
}

impl Setting {
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

/// Key/value pairs read from the deployment's secrets file.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, String>,
}

impl Secrets {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a TOML document of top-level `KEY = value` pairs.
    ///
    /// Non-string values are kept in their TOML textual form; tables are skipped.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = content.parse()?;
        let values = table
            .into_iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    toml::Value::String(s) => s,
                    toml::Value::Table(_) => return None,
                    other => other.to_string(),
                };
                Some((key, text))
            })
            .collect();
        Ok(Self { values })
    }

    /// Load a secrets file. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Application configuration, resolved once at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub ollama_base_url: Setting,
    pub default_model: Setting,
    pub page_title: Setting,
    pub app_name: Setting,
    pub api_style: Setting,
    pub system_prompt: Setting,
    pub openai_api_key: Setting,
    pub history_limit: Setting,
}

impl Config {
    /// Resolve configuration from the secrets file and the process environment.
    pub fn load() -> Self {
        let secrets = match Self::secrets_path() {
            Some(path) => match Secrets::load(&path) {
                Ok(secrets) => {
                    if !secrets.is_empty() {
                        debug!(path = %path.display(), entries = secrets.len(), "loaded secrets file");
                    }
                    secrets
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable secrets file");
                    Secrets::empty()
                }
            },
            None => Secrets::empty(),
        };

        Self::resolve(&secrets, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from explicit stores.
    pub fn resolve(secrets: &Secrets, env: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str, default: &str| resolve_setting(key, default, secrets, &env);

        let mut ollama_base_url = lookup(OLLAMA_BASE_URL, DEFAULT_BASE_URL);
        ollama_base_url.value = ollama_base_url.value.trim_end_matches('/').to_string();

        Self {
            ollama_base_url,
            default_model: lookup(DEFAULT_MODEL, DEFAULT_MODEL_NAME),
            page_title: lookup(PAGE_TITLE, DEFAULT_PAGE_TITLE),
            app_name: lookup(APP_NAME, DEFAULT_APP_NAME),
            api_style: lookup(API_STYLE, Provider::default().as_str()),
            system_prompt: lookup(SYSTEM_PROMPT, DEFAULT_SYSTEM_PROMPT),
            openai_api_key: lookup(OPENAI_API_KEY, ""),
            history_limit: lookup(HISTORY_LIMIT, ""),
        }
    }

    /// The server API style, falling back to Ollama for unknown values.
    pub fn provider(&self) -> Provider {
        Provider::from_str(self.api_style.as_str()).unwrap_or_else(|| {
            warn!(value = %self.api_style.value, "unknown {API_STYLE}, using ollama");
            Provider::Ollama
        })
    }

    /// How many transcript messages to send per turn. Empty means the whole
    /// transcript; anything but a positive integer is ignored with a warning.
    pub fn history_limit(&self) -> Option<usize> {
        let value = self.history_limit.as_str().trim();
        if value.is_empty() {
            return None;
        }
        match value.parse::<usize>() {
            Ok(limit) if limit > 0 => Some(limit),
            _ => {
                warn!(value, "invalid {HISTORY_LIMIT}, sending the whole transcript");
                None
            }
        }
    }

    /// Secrets file location: `$FLASQ_SECRETS_FILE`, then `./secrets.toml`,
    /// then `<config dir>/flasq/secrets.toml`.
    fn secrets_path() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(SECRETS_FILE_ENV) {
            return Some(PathBuf::from(explicit));
        }

        let local_path = PathBuf::from("secrets.toml");
        if local_path.exists() {
            return Some(local_path);
        }

        dirs::config_dir().map(|p| p.join("flasq").join("secrets.toml"))
    }
}

fn resolve_setting(
    key: &str,
    default: &str,
    secrets: &Secrets,
    env: &impl Fn(&str) -> Option<String>,
) -> Setting {
    let setting = if let Some(value) = secrets.get(key) {
        Setting {
            value: value.to_string(),
            source: SettingSource::Secrets,
        }
    } else if let Some(value) = env(key) {
        Setting {
            value,
            source: SettingSource::Environment,
        }
    } else {
        Setting {
            value: default.to_string(),
            source: SettingSource::Default,
        }
    };

    debug!(key, source = ?setting.source, "resolved setting");
    setting
}
