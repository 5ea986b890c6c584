
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::caption::{
    Framing, RequestMode, DEFAULT_MAX_IMAGE_BYTES, DEFAULT_MODEL, DEFAULT_OLLAMA_ENDPOINT,
    DEFAULT_PROMPT,
};

/// Environment variables that override `ollama.endpoint`, highest priority first.
pub const ENDPOINT_ENV_VARS: &[&str] = &["CAPTION_GEN_OLLAMA_URL", "OLLAMA_URL", "OLLAMA_HOST"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub caption: CaptionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    /// Replaces the built-in caption instructions when set
    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub mode: RequestMode,

    /// Whole-request timeout in seconds (0 = wait forever)
    #[serde(default)]
    pub timeout_seconds: u64,

    /// Largest image accepted, in bytes (0 = unlimited)
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,

    #[serde(default)]
    pub framing: Framing,
}

impl CaptionConfig {
    pub fn prompt(&self) -> &str {
        self.prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_PROMPT)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_ollama_endpoint() -> String {
    DEFAULT_OLLAMA_ENDPOINT.to_string()
}
fn default_ollama_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_max_image_bytes() -> u64 {
    DEFAULT_MAX_IMAGE_BYTES
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ollama_endpoint(),
            model: default_ollama_model(),
        }
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            prompt: None,
            mode: RequestMode::default(),
            timeout_seconds: 0,
            max_image_bytes: default_max_image_bytes(),
            framing: Framing::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from the default location, creating it from the template on first run.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            let mut config = Config::default();
            config.save_with_template()?;
            config.apply_env_overrides();
            return Ok(config);
        }

        Self::load_from(&path)
    }

    /// Load from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env_overrides();

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    /// Parse TOML text and expand `${VAR}` / `$VAR` references. No env overrides.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.expand_env_vars();
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let endpoint = self.ollama.endpoint.trim();
        if endpoint.is_empty() {
            anyhow::bail!("ollama.endpoint cannot be empty");
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            anyhow::bail!(
                "ollama.endpoint must start with http:// or https:// (got {})",
                endpoint
            );
        }

        if self.ollama.model.trim().is_empty() {
            anyhow::bail!("ollama.model cannot be empty");
        }

        if let Some(ref prompt) = self.caption.prompt {
            if prompt.trim().is_empty() {
                eprintln!("Warning: caption.prompt is empty; the built-in prompt will be used.");
            }
        }

        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;

        Ok(base.home_dir().join(".caption-gen").join("config.toml"))
    }

    fn expand_env_vars(&mut self) {
        self.ollama.endpoint = expand_env(&self.ollama.endpoint);
        self.ollama.model = expand_env(&self.ollama.model);
    }

    /// Endpoint from the environment wins over the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(endpoint) = endpoint_from_env(|name| std::env::var(name).ok()) {
            self.ollama.endpoint = endpoint;
        }
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["ollama", "endpoint"] => Ok(self.ollama.endpoint.clone()),
            ["ollama", "model"] => Ok(self.ollama.model.clone()),
            ["caption", "prompt"] => Ok(self.caption.prompt().to_string()),
            ["caption", "mode"] => Ok(self.caption.mode.to_string()),
            ["caption", "timeout_seconds"] => Ok(self.caption.timeout_seconds.to_string()),
            ["caption", "max_image_bytes"] => Ok(self.caption.max_image_bytes.to_string()),
            ["caption", "framing"] => Ok(self.caption.framing.to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["ollama", "endpoint"] => self.ollama.endpoint = value.to_string(),
            ["ollama", "model"] => self.ollama.model = value.to_string(),
            ["caption", "prompt"] => {
                self.caption.prompt = (!value.trim().is_empty()).then(|| value.to_string())
            }
            ["caption", "mode"] => {
                self.caption.mode = value.parse().map_err(anyhow::Error::msg)?
            }
            ["caption", "timeout_seconds"] => self.caption.timeout_seconds = value.parse()?,
            ["caption", "max_image_bytes"] => self.caption.max_image_bytes = value.parse()?,
            ["caption", "framing"] => {
                self.caption.framing = value.parse().map_err(anyhow::Error::msg)?
            }
            ["logging", "level"] => self.logging.level = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

/// First non-empty variable from [`ENDPOINT_ENV_VARS`], normalized to a URL.
fn endpoint_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ENDPOINT_ENV_VARS.iter().find_map(|name| {
        let value = lookup(name)?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        // OLLAMA_HOST is commonly given as host:port without a scheme.
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Some(trimmed.to_string())
        } else {
            Some(format!("http://{}", trimmed))
        }
    })
}

fn expand_env(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else if let Some(var_name) = s.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# caption-gen configuration
# Auto-created on first run. Edit as needed.

[ollama]
# Base URL of the Ollama server. Overridden by CAPTION_GEN_OLLAMA_URL,
# OLLAMA_URL or OLLAMA_HOST when set.
endpoint = "http://127.0.0.1:11434"
# Any multimodal model pulled into Ollama (gemma3, llava, qwen2.5vl, ...)
model = "gemma3:4b"

[caption]
# "buffered" waits for the whole caption, "streaming" prints it as it arrives
mode = "buffered"
# Whole-request timeout in seconds (0 = wait forever)
timeout_seconds = 0
# Largest image accepted, in bytes (0 = unlimited)
max_image_bytes = 20971520
# How streamed lines are framed: "line_buffered" (default) joins JSON objects
# split across network chunks, "per_chunk" drops them
framing = "line_buffered"
# Custom instructions (optional). Defaults to three short captions with hashtags.
# prompt = "Describe this photo in one witty sentence."

[logging]
level = "info"
"#;
