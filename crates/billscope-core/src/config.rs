//! Pipeline configuration, loaded from TOML with every field defaulted.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration for one extraction + prediction run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    /// Language-model fallback. `None` disables the fallback.
    pub llm: Option<LlmConfig>,
    pub impact: ImpactConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Rule confidence below which the language-model fallback is attempted.
    pub confidence_threshold: f64,
    /// Characters of normalized text kept on the output record.
    pub text_sample_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            text_sample_chars: 500,
        }
    }
}

/// Connection settings for the language-model extraction service.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    /// Bill text sent with the request is truncated to this many characters.
    pub max_input_chars: usize,
    /// Total attempts, including the first. At most one retry.
    pub max_attempts: u32,
    /// Confidence assigned when the model filled at least one field.
    pub confidence: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-haiku-20240307".to_string(),
            api_key: None,
            timeout_secs: 30,
            max_tokens: 500,
            max_input_chars: 2000,
            max_attempts: 2,
            confidence: 0.85,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_tokens", &self.max_tokens)
            .field("max_input_chars", &self.max_input_chars)
            .field("max_attempts", &self.max_attempts)
            .field("confidence", &self.confidence)
            .finish()
    }
}

impl LlmConfig {
    /// Build a config from `ANTHROPIC_API_KEY` (and optionally `ANTHROPIC_BASE_URL`).
    ///
    /// Returns `None` when no key is set: the fallback is then unavailable.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let api_key = lookup("ANTHROPIC_API_KEY").filter(|k| !k.trim().is_empty())?;
        let mut config = Self {
            api_key: Some(api_key.trim().to_string()),
            ..Self::default()
        };
        if let Some(url) = lookup("ANTHROPIC_BASE_URL").filter(|u| !u.trim().is_empty()) {
            config.base_url = url;
        }
        Some(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    /// Hourly wage used for `hours_to_cover_gap` before any bill change.
    pub default_hourly_wage: f64,
    pub equity_override: EquityOverrideConfig,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            default_hourly_wage: 15.0,
            equity_override: EquityOverrideConfig::default(),
        }
    }
}

/// Cutoffs for escalating a Low/Medium classification to High.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquityOverrideConfig {
    /// `pct_low_income` must exceed this.
    pub vulnerability_pct: f64,
    /// Predicted `tuition_change_pct` must exceed this.
    pub material_tuition_increase_pct: f64,
}

impl Default for EquityOverrideConfig {
    fn default() -> Self {
        Self {
            vulnerability_pct: 60.0,
            material_tuition_increase_pct: 5.0,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.extraction.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "extraction.confidence_threshold must be in [0, 1], got {threshold}"
            )));
        }
        if !(self.impact.default_hourly_wage > 0.0) {
            return Err(ConfigError::Invalid(
                "impact.default_hourly_wage must be positive".into(),
            ));
        }
        if let Some(llm) = &self.llm {
            if llm.timeout_secs == 0 {
                return Err(ConfigError::Invalid("llm.timeout_secs must be positive".into()));
            }
            if !(1..=2).contains(&llm.max_attempts) {
                return Err(ConfigError::Invalid(format!(
                    "llm.max_attempts must be 1 or 2, got {}",
                    llm.max_attempts
                )));
            }
            if !(0.0..=1.0).contains(&llm.confidence) {
                return Err(ConfigError::Invalid("llm.confidence must be in [0, 1]".into()));
            }
        }
        Ok(())
    }
}
