use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskmateError};

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
const COHERE_DEFAULT_BASE_URL: &str = "https://api.cohere.ai";
const COHERE_DEFAULT_MODEL: &str = "xlarge";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSelection {
    /// Cohere when a Cohere key is configured, otherwise OpenAI.
    #[default]
    Auto,
    OpenAi,
    Cohere,
}

impl ProviderSelection {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "openai" => Some(Self::OpenAi),
            "cohere" => Some(Self::Cohere),
            _ => None,
        }
    }
}

/// A concrete provider family, once `auto` has been resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Cohere,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Cohere => "cohere",
        }
    }
}

/// Which endpoint family the adapter talks to first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Chat endpoint with native tool calling, retried once on the completion endpoint.
    #[default]
    Chat,
    /// Plain text generation only; tool calling is unavailable.
    Completion,
}

impl GenerationMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "chat" => Some(Self::Chat),
            "completion" | "generate" => Some(Self::Completion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: ProviderSelection,
    #[serde(default)]
    pub mode: GenerationMode,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub cohere: ProviderConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSelection::default(),
            mode: GenerationMode::default(),
            model: None,
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            openai: ProviderConfig::default(),
            cohere: ProviderConfig::default(),
        }
    }
}

fn default_max_tokens() -> u32 {
    300
}

fn default_timeout_secs() -> u64 {
    60
}

/// Everything needed to construct one provider client.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProvider {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl ModelConfig {
    pub fn resolve(&self) -> ResolvedProvider {
        let kind = match self.provider {
            ProviderSelection::OpenAi => ProviderKind::OpenAi,
            ProviderSelection::Cohere => ProviderKind::Cohere,
            ProviderSelection::Auto if self.cohere.api_key.is_some() => ProviderKind::Cohere,
            ProviderSelection::Auto => ProviderKind::OpenAi,
        };
        let (section, default_url, default_model) = match kind {
            ProviderKind::OpenAi => (&self.openai, OPENAI_DEFAULT_BASE_URL, OPENAI_DEFAULT_MODEL),
            ProviderKind::Cohere => (&self.cohere, COHERE_DEFAULT_BASE_URL, COHERE_DEFAULT_MODEL),
        };

        ResolvedProvider {
            kind,
            api_key: section
                .api_key
                .clone()
                .or_else(|| self.api_key.clone())
                .filter(|key| !key.trim().is_empty()),
            model: section
                .model
                .clone()
                .or_else(|| self.model.clone())
                .unwrap_or_else(|| default_model.to_string()),
            base_url: section
                .endpoint
                .clone()
                .or_else(|| self.base_url.clone())
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| TaskmateError::Config(format!("Failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Defaults overlaid with `TASKMATE_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    fn apply_env(&mut self) {
        let model = &mut self.model;
        if let Some(provider) = var("TASKMATE_PROVIDER").and_then(|v| ProviderSelection::parse(&v)) {
            model.provider = provider;
        }
        if let Some(mode) = var("TASKMATE_MODE").and_then(|v| GenerationMode::parse(&v)) {
            model.mode = mode;
        }
        if let Some(name) = var("TASKMATE_MODEL") {
            model.model = Some(name);
        }
        if let Some(key) = var("TASKMATE_API_KEY") {
            model.api_key = Some(key);
        }
        if let Some(url) = var("TASKMATE_BASE_URL") {
            model.base_url = Some(url);
        }
        if let Some(key) = var("TASKMATE_OPENAI_API_KEY") {
            model.openai.api_key = Some(key);
        }
        if let Some(endpoint) = var("TASKMATE_OPENAI_ENDPOINT") {
            model.openai.endpoint = Some(endpoint);
        }
        if let Some(name) = var("TASKMATE_OPENAI_MODEL") {
            model.openai.model = Some(name);
        }
        if let Some(key) = var("TASKMATE_COHERE_API_KEY") {
            model.cohere.api_key = Some(key);
        }
        if let Some(endpoint) = var("TASKMATE_COHERE_ENDPOINT") {
            model.cohere.endpoint = Some(endpoint);
        }
        if let Some(name) = var("TASKMATE_COHERE_MODEL") {
            model.cohere.model = Some(name);
        }
        if let Some(parsed) = var("TASKMATE_MAX_TOKENS").and_then(|v| v.parse::<u32>().ok()) {
            model.max_tokens = parsed.max(1);
        }
        if let Some(level) = var("TASKMATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("TASKMATE_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            };
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[model]\nprovider='openai'\nmodel='gpt-4o'\n[logging]\nlevel='debug'"
        )
        .unwrap();

        env::set_var("TASKMATE_OPENAI_API_KEY", "sk-test");
        let cfg = AppConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("TASKMATE_OPENAI_API_KEY");

        assert_eq!(cfg.model.provider, ProviderSelection::OpenAi);
        assert_eq!(cfg.model.max_tokens, 300);
        assert_eq!(cfg.logging.level, "debug");
        let resolved = cfg.model.resolve();
        assert_eq!(resolved.kind, ProviderKind::OpenAi);
        assert_eq!(resolved.api_key.as_deref(), Some("sk-test"));
        assert_eq!(resolved.model, "gpt-4o");
        assert_eq!(resolved.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn auto_prefers_cohere_when_keyed() {
        let mut cfg = ModelConfig::default();
        cfg.openai.api_key = Some("sk-openai".into());
        assert_eq!(cfg.resolve().kind, ProviderKind::OpenAi);

        cfg.cohere.api_key = Some("co-key".into());
        let resolved = cfg.resolve();
        assert_eq!(resolved.kind, ProviderKind::Cohere);
        assert_eq!(resolved.api_key.as_deref(), Some("co-key"));
        assert_eq!(resolved.model, "xlarge");
        assert_eq!(resolved.base_url, "https://api.cohere.ai");
    }

    #[test]
    fn missing_key_resolves_without_failing() {
        let cfg = ModelConfig {
            provider: ProviderSelection::Cohere,
            base_url: Some("http://localhost:9999/".into()),
            ..ModelConfig::default()
        };
        let resolved = cfg.resolve();

        assert_eq!(resolved.api_key, None);
        assert_eq!(resolved.base_url, "http://localhost:9999");
    }

    #[test]
    fn rejects_unparseable_files() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[model\nprovider=").unwrap();

        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, TaskmateError::Config(_)));
    }
}
