//! Human-readable reasoning for an evaluation
//!
//! Reasons come out in a fixed priority order regardless of how the
//! breakdown map is laid out.

use crate::config_loader::ExplainConfig;
use crate::predictor::PredictionOutcome;
use crate::risk_types::{BlastRadiusResult, Signal, SignalSet};

pub struct Explainer {
    high_confidence: f64,
    blast_materiality: f64,
}

impl Explainer {
    pub fn new(config: &ExplainConfig) -> Self {
        Self {
            high_confidence: config.high_confidence,
            blast_materiality: config.blast_materiality,
        }
    }

    pub fn explain(
        &self,
        signals: &SignalSet,
        blast: &BlastRadiusResult,
        prediction: &PredictionOutcome,
    ) -> Vec<String> {
        let mut reasons = Vec::new();

        if signals.get(Signal::Environment) > 0.0 {
            reasons.push("Targeting PRODUCTION environment".to_string());
        }
        if signals.get(Signal::Temporal) > 0.0 {
            reasons.push("Deployment outside safe temporal window (Friday Patch Rule)".to_string());
        }
        if signals.get(Signal::Payload) > 0.0 {
            reasons.push("Dangerous payload flags detected (--force)".to_string());
        }
        if let Some(p) = prediction.probability() {
            if p > self.high_confidence {
                reasons.push(format!(
                    "AI model cross-reference: high similarity to historical outages ({:.0}% failure probability)",
                    p * 100.0
                ));
            }
        }
        if blast.score > self.blast_materiality {
            reasons.push(format!(
                "Blast radius {:.0}/100: {} downstream node(s) depend on {}",
                blast.score,
                blast.reachable,
                blast.seeds.join(", ")
            ));
        }
        match prediction {
            PredictionOutcome::Degraded { reason, .. } => {
                reasons.push(format!("Predictor degraded ({reason}); heuristic-only scoring applied"));
            }
            PredictionOutcome::Unavailable { .. } => {
                reasons.push("Predictor unavailable; heuristic-only scoring applied".to_string());
            }
            PredictionOutcome::Predicted { .. } => {}
        }

        reasons
    }
}
