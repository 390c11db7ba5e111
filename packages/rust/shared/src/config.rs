//! Application configuration for modeldoc.
//!
//! User config lives at `~/.modeldoc/modeldoc.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModelDocError, Result};
use crate::types::StageId;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "modeldoc.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".modeldoc";

// ---------------------------------------------------------------------------
// Config structs (matching modeldoc.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Text-generation service settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default artifact output directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "modeldoc-out".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat-completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on generated tokens per call.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per call, including the first, for transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.5-flash".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_output_tokens() -> u32 {
    4096
}
fn default_timeout_secs() -> u64 {
    90
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum simultaneous external calls during the fan-out stages.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Row count above which a table is treated as a fact table.
    #[serde(default = "default_fact_row_threshold")]
    pub fact_row_threshold: u64,

    /// Measures per measure-analysis request.
    #[serde(default = "default_measure_batch_size")]
    pub measure_batch_size: usize,

    /// Abort the run when a required stage's external call fails.
    #[serde(default)]
    pub strict_required_stages: bool,

    /// Confidence assigned to deterministic fallback payloads.
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f64,

    /// Confidence assumed when a response carries no usable score.
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,

    /// Free-form business context passed to every stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_context: Option<String>,

    /// Per-stage confidence ceilings.
    #[serde(default)]
    pub confidence_ceilings: ConfidenceCeilings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            fact_row_threshold: default_fact_row_threshold(),
            measure_batch_size: default_measure_batch_size(),
            strict_required_stages: false,
            fallback_confidence: default_fallback_confidence(),
            default_confidence: default_confidence(),
            business_context: None,
            confidence_ceilings: ConfidenceCeilings::default(),
        }
    }
}

fn default_max_concurrency() -> usize {
    3
}
fn default_fact_row_threshold() -> u64 {
    10_000
}
fn default_measure_batch_size() -> usize {
    25
}
fn default_fallback_confidence() -> f64 {
    0.1
}
fn default_confidence() -> f64 {
    0.7
}

/// `[pipeline.confidence_ceilings]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceCeilings {
    #[serde(default = "ceiling_low")]
    pub classification: f64,
    #[serde(default = "ceiling_low")]
    pub glossary: f64,
    #[serde(default = "ceiling_low")]
    pub architecture: f64,
    #[serde(default = "ceiling_high")]
    pub measure_analysis: f64,
    #[serde(default = "ceiling_high")]
    pub synthesis: f64,
    #[serde(default = "ceiling_high")]
    pub polish: f64,
}

impl ConfidenceCeilings {
    /// Ceiling for one stage.
    pub fn for_stage(&self, stage: StageId) -> f64 {
        match stage {
            StageId::Classification => self.classification,
            StageId::Glossary => self.glossary,
            StageId::Architecture => self.architecture,
            StageId::MeasureAnalysis => self.measure_analysis,
            StageId::Synthesis => self.synthesis,
            StageId::Polish => self.polish,
        }
    }
}

impl Default for ConfidenceCeilings {
    fn default() -> Self {
        Self {
            classification: ceiling_low(),
            glossary: ceiling_low(),
            architecture: ceiling_low(),
            measure_analysis: ceiling_high(),
            synthesis: ceiling_high(),
            polish: ceiling_high(),
        }
    }
}

fn ceiling_low() -> f64 {
    0.96
}
fn ceiling_high() -> f64 {
    0.98
}

// ---------------------------------------------------------------------------
// Pipeline settings (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Model identifier, recorded in the metadata record.
    pub model: String,
    /// Sampling temperature for every stage.
    pub temperature: f32,
    /// Generated-token bound per call.
    pub max_output_tokens: u32,
    /// Timeout applied to each external call.
    pub call_timeout: Duration,
    /// Attempts per call for transient failures.
    pub max_attempts: u32,
    /// Base backoff delay.
    pub retry_base: Duration,
    /// Fan-out admission limit.
    pub max_concurrency: usize,
    /// Fact/dimension row-count threshold.
    pub fact_row_threshold: u64,
    /// Measures per measure-analysis request.
    pub measure_batch_size: usize,
    /// Abort on required-stage service failure instead of falling back.
    pub strict_required_stages: bool,
    /// Confidence for fallback payloads.
    pub fallback_confidence: f64,
    /// Confidence when the response does not state one.
    pub default_confidence: f64,
    /// Business context passed to every stage.
    pub business_context: Option<String>,
    /// Per-stage confidence ceilings.
    pub ceilings: ConfidenceCeilings,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_output_tokens: config.llm.max_output_tokens,
            call_timeout: Duration::from_secs(config.llm.timeout_secs),
            max_attempts: config.llm.max_attempts.max(1),
            retry_base: Duration::from_millis(config.llm.retry_base_ms),
            max_concurrency: config.pipeline.max_concurrency.max(1),
            fact_row_threshold: config.pipeline.fact_row_threshold,
            measure_batch_size: config.pipeline.measure_batch_size.max(1),
            strict_required_stages: config.pipeline.strict_required_stages,
            fallback_confidence: config.pipeline.fallback_confidence.clamp(0.0, 0.3),
            default_confidence: config.pipeline.default_confidence.clamp(0.0, 1.0),
            business_context: config.pipeline.business_context.clone(),
            ceilings: config.pipeline.confidence_ceilings.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.modeldoc/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ModelDocError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.modeldoc/modeldoc.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ModelDocError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ModelDocError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ModelDocError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ModelDocError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ModelDocError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the API key from the configured env var.
pub fn api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ModelDocError::config(format!(
            "API key not found. Set the {var_name} environment variable \
             or run with --offline for a heuristic-only report."
        ))),
    }
}

/// Check that the API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    api_key(config).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("fact_row_threshold"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.max_concurrency, 3);
        assert_eq!(parsed.pipeline.fact_row_threshold, 10_000);
        assert_eq!(parsed.llm.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[pipeline]
fact_row_threshold = 500
business_context = "Retail chain, weekly reporting"

[pipeline.confidence_ceilings]
synthesis = 0.9
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.fact_row_threshold, 500);
        assert_eq!(config.pipeline.max_concurrency, 3);
        assert_eq!(config.pipeline.confidence_ceilings.synthesis, 0.9);
        assert_eq!(config.pipeline.confidence_ceilings.polish, 0.98);
        assert_eq!(config.llm.max_attempts, 3);
    }

    #[test]
    fn settings_from_app_config() {
        let mut app = AppConfig::default();
        app.pipeline.fallback_confidence = 0.9;
        app.pipeline.max_concurrency = 0;
        let settings = PipelineSettings::from(&app);
        assert_eq!(settings.max_concurrency, 1);
        assert_eq!(settings.fallback_confidence, 0.3);
        assert_eq!(settings.call_timeout, Duration::from_secs(90));
        assert_eq!(settings.ceilings.for_stage(StageId::Glossary), 0.96);
        assert_eq!(settings.ceilings.for_stage(StageId::Polish), 0.98);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        config.llm.api_key_env = "MODELDOC_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
