//! Configuration management for verdict
//!
//! Settings live in ~/.config/verdict/config.toml; credentials and model
//! defaults can also come from the environment.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;
use verdict_core::util::redact_key;
use verdict_core::{default_categories, CallOptions, ScoringPrompts};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_SCORED_ROLE: &str = "user";
pub const DEFAULT_CONTEXT_WINDOW: usize = 1;

const DEFAULT_FALLBACK_MODELS: [&str; 3] = [
    "openai/gpt-4o-mini",
    "google/gemini-2.0-flash-001",
    "meta-llama/llama-3.3-70b-instruct",
];

const ENV_API_KEYS: &str = "VERDICT_API_KEYS";
const ENV_API_KEY: &str = "VERDICT_API_KEY";
const ENV_OPENROUTER_KEY: &str = "OPENROUTER_API_KEY";
const ENV_DEFAULT_MODEL: &str = "VERDICT_DEFAULT_MODEL";
const ENV_MODEL_OVERRIDE: &str = "VERDICT_MODEL_OVERRIDE";
const ENV_BASE_URL: &str = "VERDICT_BASE_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OpenAI-compatible API root; `chat/completions` is appended.
    pub base_url: String,
    /// Built-in candidates tried after any preferred/override/default model.
    pub fallback_models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    /// Ordered provider keys. Prefer the environment over storing them here.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub api_keys: Vec<String>,
    pub categories: Vec<String>,
    /// Preceding turns attached to each scored item.
    pub context_window: usize,
    pub scored_role: String,
    pub synthesis: bool,
    pub call: CallOptions,
    pub prompts: ScoringPrompts,
}

impl Default for Config {
    fn default() -> Self {
        let categories = default_categories();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            default_model: None,
            model_override: None,
            api_keys: Vec::new(),
            prompts: ScoringPrompts::for_categories(&categories),
            categories,
            context_window: DEFAULT_CONTEXT_WINDOW,
            scored_role: DEFAULT_SCORED_ROLE.to_string(),
            synthesis: true,
            call: CallOptions::default(),
        }
    }
}

/// Environment values that layer over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    pub api_keys: Vec<String>,
    pub default_model: Option<String>,
    pub model_override: Option<String>,
    pub base_url: Option<String>,
}

impl EnvOverlay {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let api_keys = get(ENV_API_KEYS)
            .map(|list| split_keys(&list))
            .or_else(|| get(ENV_API_KEY).map(|key| vec![key.trim().to_string()]))
            .or_else(|| get(ENV_OPENROUTER_KEY).map(|key| vec![key.trim().to_string()]))
            .unwrap_or_default();
        Self {
            api_keys,
            default_model: get(ENV_DEFAULT_MODEL),
            model_override: get(ENV_MODEL_OVERRIDE),
            base_url: get(ENV_BASE_URL),
        }
    }
}

fn split_keys(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

fn trimmed_unique(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim();
        if !value.is_empty() && !out.iter().any(|existing| existing == value) {
            out.push(value.to_string());
        }
    }
    out
}

impl Config {
    fn sanitize(&mut self) {
        self.fallback_models = trimmed_unique(&self.fallback_models);
        if self.fallback_models.is_empty() {
            self.fallback_models = Config::default().fallback_models;
        }
        self.categories = trimmed_unique(&self.categories);
        if self.categories.is_empty() {
            self.categories = default_categories();
        }
        self.api_keys = trimmed_unique(&self.api_keys);
        self.scored_role = self.scored_role.trim().to_string();
        if self.scored_role.is_empty() {
            self.scored_role = DEFAULT_SCORED_ROLE.to_string();
        }
        self.default_model = self.default_model.take().filter(|m| !m.trim().is_empty());
        self.model_override = self.model_override.take().filter(|m| !m.trim().is_empty());
    }

    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("verdict"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/verdict/config.toml".to_string())
    }

    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> anyhow::Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`. A missing file yields defaults; an unreadable or
    /// corrupt one is an error.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Config file {} is invalid", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse TOML")?;
        config.sanitize();
        Ok(config)
    }

    /// Layer environment values over the file values.
    pub fn apply_env(&mut self, env: &EnvOverlay) {
        if !env.api_keys.is_empty() {
            self.api_keys = env.api_keys.clone();
        }
        if let Some(model) = &env.default_model {
            self.default_model = Some(model.clone());
        }
        if let Some(model) = &env.model_override {
            self.model_override = Some(model.clone());
        }
        if let Some(url) = &env.base_url {
            self.base_url = url.clone();
        }
        self.sanitize();
    }

    /// Check every value that would otherwise fail at call time.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("base_url '{}' is not a valid URL", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("base_url must use http or https, got '{}'", url.scheme());
        }
        self.call
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [call] settings: {}", e))?;
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_keys.is_empty()
    }

    /// Keys for display, each reduced to its last four characters.
    pub fn redacted_keys(&self) -> Vec<String> {
        self.api_keys.iter().map(|key| redact_key(key)).collect()
    }

    /// Effective settings as TOML with keys redacted.
    pub fn to_display_toml(&self) -> anyhow::Result<String> {
        let mut shown = self.clone();
        shown.api_keys = self.redacted_keys();
        toml::to_string_pretty(&shown).context("Failed to render config")
    }
}
