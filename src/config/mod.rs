//! Configuration loading for [`AgenticConfig`].
//!
//! Format auto-detection and `${VAR}`/`$VAR` environment substitution are
//! layered under a file source, with environment variables always taking
//! precedence over the file and the file over built-in defaults.

use config::{Config as Cfg, Environment, File, FileFormat};
use regex::Regex;
use std::path::Path;

/// Configuration format detection error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detect configuration format from file extension
///
/// # Supported Extensions
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
/// - INI: `.ini`
/// - RON: `.ron`
/// - JSON5: `.json5`
///
/// # Example
///
/// ```rust,ignore
/// use mofa_kernel::config::detect_format;
///
/// let format = detect_format("config.toml").unwrap();
/// assert_eq!(format, FileFormat::Toml);
/// ```
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string
///
/// Supports both `${VAR_NAME}` and `$VAR_NAME` syntax. Uses regex to find and
/// replace all environment variable references with their values.
///
/// # Syntax
///
/// - `${VAR_NAME}` - Environment variable in braces (preferred)
/// - `$VAR_NAME` - Environment variable without braces
///
/// # Example
///
/// ```rust,ignore
/// use mofa_kernel::config::substitute_env_vars;
///
/// std::env::set_var("DATABASE_URL", "postgres://localhost/mydb");
/// let result = substitute_env_vars("db_url: ${DATABASE_URL}");
/// assert_eq!(result, "db_url: postgres://localhost/mydb");
/// ```
pub fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    // Match ${VAR_NAME} pattern (braced syntax - higher priority)
    let re_braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    result = re_braced
        .replace_all(&result, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string();

    // Match $VAR_NAME pattern (non-braced, but only if not already substituted)
    // This regex matches $ followed by a valid identifier name
    let re_simple = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").unwrap();
    result = re_simple
        .replace_all(&result, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string();

    result
}


/// Runtime parameters for the agentic pipeline.
///
/// Loaded from environment variables (prefix `AGENTIC__`, `__` separator)
/// layered over an optional config file, falling back to the defaults
/// below when nothing is configured — an entirely absent configuration
/// still yields spec-compliant behavior.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AgenticConfig {
    #[serde(default = "AgenticConfig::default_max_plan_timeout_seconds")]
    pub max_plan_timeout_seconds: f64,

    #[serde(default = "AgenticConfig::default_max_workers")]
    pub max_workers: usize,

    #[serde(default)]
    pub llm_api_key: Option<String>,

    #[serde(default = "AgenticConfig::default_llm_model")]
    pub llm_model: String,

    #[serde(default)]
    pub web_search_api_key: Option<String>,
}

impl AgenticConfig {
    fn default_max_plan_timeout_seconds() -> f64 {
        30.0
    }

    fn default_max_workers() -> usize {
        4
    }

    fn default_llm_model() -> String {
        "gpt-4o-mini".to_string()
    }

    /// Load configuration from the environment only, applying the defaults
    /// above for anything unset. Never fails: absence of configuration is
    /// the expected steady state, not an error.
    pub fn from_env() -> Self {
        Cfg::builder()
            .set_default("max_plan_timeout_seconds", Self::default_max_plan_timeout_seconds())
            .unwrap()
            .set_default("max_workers", Self::default_max_workers() as i64)
            .unwrap()
            .set_default("llm_model", Self::default_llm_model())
            .unwrap()
            .add_source(Environment::with_prefix("AGENTIC").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .unwrap_or_else(|_| Self::default())
    }

    /// Load configuration from a file (format auto-detected by extension,
    /// `${VAR}` substitution applied), with environment variables layered
    /// on top so deployment-time overrides always win.
    pub fn from_file_and_env(path: &str) -> ConfigResult<Self> {
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&content);

        Cfg::builder()
            .set_default("max_plan_timeout_seconds", Self::default_max_plan_timeout_seconds())
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .set_default("max_workers", Self::default_max_workers() as i64)
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .set_default("llm_model", Self::default_llm_model())
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .add_source(File::from_str(&substituted, format))
            .add_source(Environment::with_prefix("AGENTIC").separator("__"))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Serialization(e.to_string()))
    }
}

impl Default for AgenticConfig {
    fn default() -> Self {
        Self {
            max_plan_timeout_seconds: Self::default_max_plan_timeout_seconds(),
            max_workers: Self::default_max_workers(),
            llm_api_key: None,
            llm_model: Self::default_llm_model(),
            web_search_api_key: None,
        }
    }
}

#[cfg(test)]
mod agentic_config_tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = AgenticConfig::default();
        assert_eq!(cfg.max_plan_timeout_seconds, 30.0);
        assert_eq!(cfg.max_workers, 4);
    }

    #[test]
    fn from_env_never_fails_when_unset() {
        let cfg = AgenticConfig::from_env();
        assert_eq!(cfg.max_workers, 4);
    }
}
