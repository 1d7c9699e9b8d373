//! Layered engine configuration: compiled defaults, then `assure.toml`
//! (or the file named by `ASSURE_CONFIG`), then `ASSURE_*` environment
//! variables with `__` separating nested keys.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::{AssureError, AssureResult};
use crate::synthesizer::MAX_SCORE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bias_path: String,
    pub audit_path: String,
    pub audit_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bias_path: "data/feature_bias.json".to_string(),
            audit_path: "data/evaluations".to_string(),
            audit_enabled: true,
        }
    }
}

/// Constants for the heuristic signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Weekday name accepted by chrono, e.g. "friday" or "Fri"
    pub risky_weekday: String,
    /// Hours in `[safe_window_start, safe_window_end]` are safe
    pub safe_window_start: u32,
    pub safe_window_end: u32,
    pub temporal_bonus: f64,
    pub production_environment: String,
    pub environment_bonus: f64,
    pub dangerous_actions: Vec<String>,
    pub dangerous_severity: f64,
    pub baseline_severity: f64,
    pub force_markers: Vec<String>,
    pub payload_bonus: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            risky_weekday: "friday".to_string(),
            safe_window_start: 8,
            safe_window_end: 14,
            temporal_bonus: 25.0,
            production_environment: "PRODUCTION".to_string(),
            environment_bonus: 20.0,
            dangerous_actions: vec![
                "DATABASE_MIGRATION".to_string(),
                "FORCE_DELETE".to_string(),
                "ROOT_ACCESS".to_string(),
                "SECRET_ROTATION".to_string(),
            ],
            dangerous_severity: 40.0,
            baseline_severity: 10.0,
            force_markers: vec!["--force".to_string(), "-f".to_string()],
            payload_bonus: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Share of the final score taken from the heuristic sum when a
    /// prediction is present; the remainder comes from the predictor term
    pub heuristic_blend: f64,
    /// Scales a probability in [0,1] onto the score range
    pub predictor_weight: f64,
    /// Scales the blast radius into the additive impact term
    pub impact_weight: f64,
    pub jitter_amplitude: f64,
    pub jitter_seed: Option<u64>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            heuristic_blend: 0.6,
            predictor_weight: 100.0,
            impact_weight: 0.2,
            jitter_amplitude: 0.0,
            jitter_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictConfig {
    pub default_threshold: f64,
    pub warn_divisor: f64,
}

impl Default for VerdictConfig {
    fn default() -> Self {
        Self {
            default_threshold: 70.0,
            warn_divisor: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainConfig {
    pub high_confidence: f64,
    pub blast_materiality: f64,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            high_confidence: 0.7,
            blast_materiality: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    pub reward_factor: f64,
    pub penalty_factor: f64,
    pub bias_floor: f64,
    pub bias_ceiling: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            reward_factor: 1.05,
            penalty_factor: 0.92,
            bias_floor: 0.4,
            bias_ceiling: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictorMode {
    Linear,
    Remote,
    Disabled,
}

/// Weights for the built-in logistic predictor, in feature-vector order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearWeights {
    pub model_id: String,
    pub bias: f64,
    pub weights: Vec<f64>,
}

impl Default for LinearWeights {
    fn default() -> Self {
        Self {
            model_id: "assure_linear_v1".to_string(),
            // Historical outages cluster on production targets; force flags
            // and dangerous actions push further.
            bias: -2.0,
            weights: vec![3.0, 0.5, 0.8, 1.2],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub mode: PredictorMode,
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub linear: LinearWeights,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            mode: PredictorMode::Linear,
            endpoint: None,
            timeout_ms: 500,
            linear: LinearWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSource {
    /// TOML graph file; the bundled topology is used when unset
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub verdict: VerdictConfig,
    #[serde(default)]
    pub explain: ExplainConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub graph: GraphSource,
}

impl EngineConfig {
    /// Reject settings that would break the scoring invariants
    pub fn validate(&self) -> AssureResult<()> {
        let blend = self.synthesis.heuristic_blend;
        if !(0.0..=1.0).contains(&blend) {
            return Err(AssureError::config(format!(
                "synthesis.heuristic_blend must be within [0, 1], got {blend}"
            )));
        }
        if self.verdict.warn_divisor <= 1.0 {
            return Err(AssureError::config("verdict.warn_divisor must be greater than 1"));
        }
        if self.learning.reward_factor <= 1.0 {
            return Err(AssureError::config("learning.reward_factor must be greater than 1"));
        }
        let penalty = self.learning.penalty_factor;
        if penalty <= 0.0 || penalty >= 1.0 {
            return Err(AssureError::config("learning.penalty_factor must be within (0, 1)"));
        }
        if self.learning.bias_floor <= 0.0 || self.learning.bias_floor >= self.learning.bias_ceiling {
            return Err(AssureError::config(
                "learning.bias_floor must be positive and below learning.bias_ceiling",
            ));
        }
        if self.predictor.timeout_ms == 0 {
            return Err(AssureError::config("predictor.timeout_ms must be positive"));
        }
        if self.predictor.mode == PredictorMode::Remote && self.predictor.endpoint.is_none() {
            return Err(AssureError::config("predictor.endpoint is required in remote mode"));
        }
        if self.signals.safe_window_start > 23 || self.signals.safe_window_end > 23 {
            return Err(AssureError::config("signals safe window hours must be within 0..=23"));
        }
        if self.signals.safe_window_start > self.signals.safe_window_end {
            return Err(AssureError::config(
                "signals.safe_window_start must not be after signals.safe_window_end",
            ));
        }
        let amplitude = self.synthesis.jitter_amplitude;
        if !(0.0..=MAX_SCORE).contains(&amplitude) {
            return Err(AssureError::config(format!(
                "synthesis.jitter_amplitude must be within [0, {MAX_SCORE}], got {amplitude}"
            )));
        }
        Ok(())
    }
}

/// Build the figment used by `load_config`; split out so tests can merge
/// their own providers on top.
pub fn figment(path: Option<&str>) -> Figment {
    let path = path
        .map(str::to_string)
        .or_else(|| std::env::var("ASSURE_CONFIG").ok())
        .unwrap_or_else(|| "assure.toml".to_string());

    Figment::from(Serialized::defaults(EngineConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ASSURE_").split("__"))
}

pub fn load_config(path: Option<&str>) -> AssureResult<EngineConfig> {
    let config: EngineConfig = figment(path).extract()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.verdict.warn_divisor, 1.5);
        assert_eq!(config.learning.bias_floor, 0.4);
        assert_eq!(config.learning.bias_ceiling, 3.0);
    }

    #[test]
    fn toml_and_env_layers_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "assure.toml",
                r#"
                [verdict]
                default_threshold = 60.0

                [predictor]
                mode = "disabled"
                "#,
            )?;
            jail.set_env("ASSURE_VERDICT__WARN_DIVISOR", "2.0");

            let config = load_config(None).map_err(|e| e.to_string())?;
            assert_eq!(config.verdict.default_threshold, 60.0);
            assert_eq!(config.verdict.warn_divisor, 2.0);
            assert_eq!(config.predictor.mode, PredictorMode::Disabled);
            assert_eq!(config.synthesis.heuristic_blend, 0.6);
            Ok(())
        });
    }

    #[test]
    fn invalid_blend_fails_fast() {
        let mut config = EngineConfig::default();
        config.synthesis.heuristic_blend = 1.4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heuristic_blend"));
    }

    #[test]
    fn remote_mode_requires_endpoint() {
        let mut config = EngineConfig::default();
        config.predictor.mode = PredictorMode::Remote;
        assert!(config.validate().is_err());

        config.predictor.endpoint = Some("http://127.0.0.1:9000/predict".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn jitter_amplitude_must_be_a_bounded_score_offset() {
        for bad in [1e308, f64::INFINITY, f64::NAN, -1.0, 100.5] {
            let mut config = EngineConfig::default();
            config.synthesis.jitter_amplitude = bad;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("jitter_amplitude"), "{bad}");
        }

        let mut config = EngineConfig::default();
        config.synthesis.jitter_amplitude = 2.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_safe_window_is_rejected() {
        let mut config = EngineConfig::default();
        config.signals.safe_window_start = 18;
        config.signals.safe_window_end = 6;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("safe_window_start"));

        config.signals.safe_window_start = 6;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn penalty_must_shrink() {
        let mut config = EngineConfig::default();
        config.learning.penalty_factor = 1.0;
        assert!(config.validate().is_err());
    }
}
