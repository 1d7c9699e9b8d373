//! Blends heuristic signals, blast radius and the predictor probability
//! into one bounded score.
//!
//! With a prediction:
//!   final = base * blend + predicted * (1 - blend) + impact + jitter
//! Without one (predictor unavailable, failed or timed out):
//!   final = base + impact + jitter
//! where `base` is the bias-weighted heuristic sum, `predicted` is
//! `p * predictor_weight * bias(ml)` and `impact` is
//! `blast_radius * impact_weight * bias(blast_radius)`. The result is
//! clamped into [0, 100].

use std::collections::BTreeMap;

use crate::bias_table::BiasTable;
use crate::config_loader::SynthesisConfig;
use crate::jitter::Jitter;
use crate::predictor::PredictionOutcome;
use crate::risk_types::{BlastRadiusResult, SignalSet, BLAST_FEATURE, ML_FEATURE};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Score plus the intermediate values the explainer and response need
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub score: f64,
    /// Component name to sub-score
    pub breakdown: BTreeMap<String, f64>,
    pub heuristic_only: bool,
}

pub struct RiskSynthesizer {
    heuristic_blend: f64,
    predictor_weight: f64,
    impact_weight: f64,
}

impl RiskSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            heuristic_blend: config.heuristic_blend,
            predictor_weight: config.predictor_weight,
            impact_weight: config.impact_weight,
        }
    }

    pub fn synthesize(
        &self,
        signals: &SignalSet,
        blast: &BlastRadiusResult,
        prediction: &PredictionOutcome,
        biases: &BiasTable,
        jitter: &dyn Jitter,
    ) -> Synthesis {
        let mut breakdown = BTreeMap::new();

        let mut base = 0.0;
        for (signal, value) in signals.iter() {
            let weighted = value * biases.get_bias(signal.bias_feature());
            breakdown.insert(signal.name().to_string(), weighted);
            base += weighted;
        }
        breakdown.insert("heuristic".to_string(), base);

        let impact = blast.score * self.impact_weight * biases.get_bias(BLAST_FEATURE);
        breakdown.insert("impact".to_string(), impact);

        let (blended, heuristic_only) = match prediction.probability() {
            Some(p) => {
                let predicted = p * self.predictor_weight * biases.get_bias(ML_FEATURE);
                let ml_share = predicted * (1.0 - self.heuristic_blend);
                breakdown.insert("ml_boost".to_string(), ml_share);
                (base * self.heuristic_blend + ml_share, false)
            }
            None => {
                breakdown.insert("ml_boost".to_string(), 0.0);
                (base, true)
            }
        };

        let noise = jitter.sample();
        if noise != 0.0 {
            breakdown.insert("jitter".to_string(), noise);
        }

        let raw = blended + impact + noise;
        let score = if raw.is_nan() {
            MAX_SCORE
        } else {
            raw.clamp(MIN_SCORE, MAX_SCORE)
        };
        breakdown.insert("final_score".to_string(), score);

        Synthesis {
            score,
            breakdown,
            heuristic_only,
        }
    }
}
