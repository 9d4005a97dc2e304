//! Run configuration: optional TOML file with defaults for every key.
//!
//! The API credential resolves from the command line / environment first and
//! the config file second. A missing credential is fatal before any request
//! is made.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "ANTHROPIC_API_KEY not found. Export it in your shell, pass --api-key, \
         or set `api_key` under [api] in the config file."
    )]
    MissingApiKey,
    #[error("config file not found: {0}. Check the --config path or MATSPEC_CONFIG.")]
    NotFound(PathBuf),
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid setting `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSettings {
    pub base_url: String,
    pub model: String,
    pub vision_max_tokens: u32,
    pub spec_max_tokens: u32,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            vision_max_tokens: 1024,
            spec_max_tokens: 4096,
            timeout_secs: 120,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    /// Images in flight at once; 1 means strictly sequential.
    pub concurrency: usize,
    /// Characters of the brief sent alongside each image.
    pub brief_excerpt_chars: usize,
    /// Longest edge, in pixels, of images sent to the API.
    pub max_image_edge: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            brief_excerpt_chars: 200,
            max_image_edge: 1568,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub transient_retries: u32,
    pub transient_delay_ms: u64,
    pub rate_limit_attempts: u32,
    pub rate_limit_base_ms: u64,
    pub rate_limit_cap_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            transient_retries: 1,
            transient_delay_ms: 2_000,
            rate_limit_attempts: 4,
            rate_limit_base_ms: 2_000,
            rate_limit_cap_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    pub dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

/// Overrides for the built-in instruction templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptSettings {
    /// Replaces the body of the vision instruction; the brief excerpt is still
    /// prepended.
    pub vision_instructions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub api: ApiSettings,
    pub pipeline: PipelineSettings,
    pub retry: RetrySettings,
    pub output: OutputSettings,
    pub prompts: PromptSettings,
}

impl Settings {
    /// Load settings from an optional TOML file; `None` gives the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            debug!("no config file given, using defaults");
            return Ok(Self::default());
        };
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml_str(&text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        info!(path = %path.display(), "loaded config file");
        Ok(settings)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.message().to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "pipeline.concurrency",
                message: "must be at least 1".into(),
            });
        }
        if self.retry.rate_limit_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "retry.rate_limit_attempts",
                message: "must be at least 1".into(),
            });
        }
        if self.pipeline.max_image_edge < 64 {
            return Err(ConfigError::Invalid {
                key: "pipeline.max_image_edge",
                message: "must be at least 64 pixels".into(),
            });
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                key: "api.base_url",
                message: format!("`{}` is not an http(s) URL", self.api.base_url),
            });
        }
        Ok(())
    }

    /// Resolve the API credential.
    ///
    /// Priority: `from_env` (command line or `ANTHROPIC_API_KEY`), then
    /// `api.api_key` from the config file. Blank values are ignored.
    pub fn resolve_api_key(&self, from_env: Option<&str>) -> Result<String, ConfigError> {
        let env_key = from_env.map(str::trim).filter(|k| !k.is_empty());
        let file_key = self
            .api
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        match (env_key, file_key) {
            (Some(key), file) => {
                if file.is_some() {
                    debug!("API key set in both environment and config file, using environment");
                }
                Ok(key.to_string())
            }
            (None, Some(key)) => {
                debug!("API key loaded from config file");
                Ok(key.to_string())
            }
            (None, None) => Err(ConfigError::MissingApiKey),
        }
    }
}
