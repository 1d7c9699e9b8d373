//! Learned-probability predictors
//!
//! The engine only relies on the `Predictor` contract: a feature vector in,
//! a probability in [0,1] out. Which predictor is live is decided once at
//! startup and captured in `PredictorState`; the active predictor is never
//! mutated while requests are in flight.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config_loader::{LinearWeights, PredictorConfig, PredictorMode};
use crate::errors::{AssureError, AssureResult};
use crate::risk_types::ActionRequest;
use crate::signals::SignalExtractor;

/// Names of the predictor inputs, in vector order
pub const FEATURE_NAMES: [&str; 4] = ["is_production", "hour_of_day", "dangerous_action", "force_flag"];

/// Feature vector handed to the predictor
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorFeatures {
    pub is_production: f64,   // 0 or 1
    pub hour_of_day: f64,     // hour / 23
    pub dangerous_action: f64, // 0 or 1
    pub force_flag: f64,      // 0 or 1
}

impl PredictorFeatures {
    pub fn new(request: &ActionRequest, extractor: &SignalExtractor, now: NaiveDateTime) -> Self {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        Self {
            is_production: flag(extractor.is_production(request)),
            hour_of_day: now.hour() as f64 / 23.0,
            dangerous_action: flag(extractor.is_dangerous_action(request)),
            force_flag: flag(extractor.has_force_flag(request)),
        }
    }

    pub fn to_vector(&self) -> Vec<f64> {
        vec![
            self.is_production,
            self.hour_of_day,
            self.dangerous_action,
            self.force_flag,
        ]
    }
}

#[async_trait]
pub trait Predictor: Send + Sync {
    fn model_id(&self) -> &str;

    /// Probability of an adverse outcome, in [0,1]
    async fn predict(&self, features: &[f64]) -> AssureResult<f64>;
}

/// Optional per-feature attribution for a prediction
pub trait Attribution: Send + Sync {
    fn attribute(&self, features: &[f64]) -> BTreeMap<String, f64>;
}

/// Logistic model: sigmoid(bias + sum(weight_i * feature_i))
#[derive(Debug, Clone)]
pub struct LinearPredictor {
    weights: LinearWeights,
}

impl LinearPredictor {
    pub fn new(weights: LinearWeights) -> AssureResult<Self> {
        if weights.weights.len() != FEATURE_NAMES.len() {
            return Err(AssureError::config(format!(
                "predictor.linear.weights needs {} values, got {}",
                FEATURE_NAMES.len(),
                weights.weights.len()
            )));
        }
        Ok(Self { weights })
    }

    pub fn probability(&self, features: &[f64]) -> AssureResult<f64> {
        if features.len() != self.weights.weights.len() {
            return Err(AssureError::predictor(
                &self.weights.model_id,
                format!("expected {} features, got {}", self.weights.weights.len(), features.len()),
            ));
        }

        let linear = self.weights.bias
            + features
                .iter()
                .zip(self.weights.weights.iter())
                .map(|(f, w)| f * w)
                .sum::<f64>();

        Ok(1.0 / (1.0 + (-linear).exp()))
    }
}

#[async_trait]
impl Predictor for LinearPredictor {
    fn model_id(&self) -> &str {
        &self.weights.model_id
    }

    async fn predict(&self, features: &[f64]) -> AssureResult<f64> {
        self.probability(features)
    }
}

impl Attribution for LinearPredictor {
    fn attribute(&self, features: &[f64]) -> BTreeMap<String, f64> {
        FEATURE_NAMES
            .iter()
            .zip(features.iter().zip(self.weights.weights.iter()))
            .map(|(name, (f, w))| (name.to_string(), f * w))
            .collect()
    }
}

#[derive(Serialize)]
struct RemoteRequest<'a> {
    model_id: &'a str,
    features: &'a [f64],
    feature_names: &'a [&'a str],
}

#[derive(Deserialize)]
struct RemoteResponse {
    probability: f64,
}

/// Model served over HTTP: POST `{features}` -> `{probability}`
pub struct RemotePredictor {
    client: reqwest::Client,
    endpoint: String,
    model_id: String,
}

impl RemotePredictor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> AssureResult<Self> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AssureError::config(format!("cannot build predictor client: {e}")))?;
        Ok(Self {
            client,
            model_id: format!("remote:{endpoint}"),
            endpoint,
        })
    }
}

#[async_trait]
impl Predictor for RemotePredictor {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn predict(&self, features: &[f64]) -> AssureResult<f64> {
        let body = RemoteRequest {
            model_id: &self.model_id,
            features,
            feature_names: &FEATURE_NAMES,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AssureError::predictor(&self.model_id, e.to_string()))?;
        let parsed: RemoteResponse = response
            .json()
            .await
            .map_err(|e| AssureError::predictor(&self.model_id, e.to_string()))?;

        if !(0.0..=1.0).contains(&parsed.probability) {
            return Err(AssureError::predictor(
                &self.model_id,
                format!("probability out of range: {}", parsed.probability),
            ));
        }
        Ok(parsed.probability)
    }
}

/// Returns the same probability for every input
pub struct StaticPredictor {
    probability: f64,
    model_id: String,
}

impl StaticPredictor {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            model_id: "static".to_string(),
        }
    }
}

#[async_trait]
impl Predictor for StaticPredictor {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn predict(&self, _features: &[f64]) -> AssureResult<f64> {
        Ok(self.probability)
    }
}

/// Predictor capability, resolved once at startup
#[derive(Clone)]
pub enum PredictorState {
    Available {
        predictor: Arc<dyn Predictor>,
        attribution: Option<Arc<dyn Attribution>>,
        timeout: Duration,
    },
    Unavailable {
        reason: String,
    },
}

/// Result of asking the predictor for one request
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    Predicted {
        probability: f64,
        model_id: String,
        attribution: Option<BTreeMap<String, f64>>,
    },
    /// The predictor exists but failed or timed out for this request
    Degraded { model_id: String, reason: String },
    Unavailable { reason: String },
}

impl PredictionOutcome {
    pub fn probability(&self) -> Option<f64> {
        match self {
            PredictionOutcome::Predicted { probability, .. } => Some(*probability),
            _ => None,
        }
    }
}

impl PredictorState {
    pub fn from_config(config: &PredictorConfig) -> AssureResult<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        match config.mode {
            PredictorMode::Linear => {
                let linear = Arc::new(LinearPredictor::new(config.linear.clone())?);
                Ok(PredictorState::Available {
                    predictor: linear.clone(),
                    attribution: Some(linear),
                    timeout,
                })
            }
            PredictorMode::Remote => {
                let endpoint = config
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| AssureError::config("predictor.endpoint is required in remote mode"))?;
                Ok(PredictorState::Available {
                    predictor: Arc::new(RemotePredictor::new(endpoint, timeout)?),
                    attribution: None,
                    timeout,
                })
            }
            PredictorMode::Disabled => Ok(PredictorState::Unavailable {
                reason: "predictor disabled by configuration".to_string(),
            }),
        }
    }

    pub fn available(predictor: Arc<dyn Predictor>, timeout: Duration) -> Self {
        PredictorState::Available {
            predictor,
            attribution: None,
            timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, PredictorState::Available { .. })
    }

    pub fn model_id(&self) -> Option<&str> {
        match self {
            PredictorState::Available { predictor, .. } => Some(predictor.model_id()),
            PredictorState::Unavailable { .. } => None,
        }
    }

    /// Run the predictor under its timeout. Never fails: errors become
    /// `Degraded` so the caller can fall back to heuristics.
    pub async fn predict(&self, features: &PredictorFeatures) -> PredictionOutcome {
        let (predictor, attribution, timeout) = match self {
            PredictorState::Available {
                predictor,
                attribution,
                timeout,
            } => (predictor, attribution, *timeout),
            PredictorState::Unavailable { reason } => {
                return PredictionOutcome::Unavailable {
                    reason: reason.clone(),
                }
            }
        };

        let vector = features.to_vector();
        let model_id = predictor.model_id().to_string();
        let result = match tokio::time::timeout(timeout, predictor.predict(&vector)).await {
            Ok(result) => result,
            Err(_) => Err(AssureError::PredictorTimeout {
                model_id: model_id.clone(),
                millis: timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(p) if p.is_finite() => PredictionOutcome::Predicted {
                probability: p.clamp(0.0, 1.0),
                attribution: attribution.as_ref().map(|a| a.attribute(&vector)),
                model_id,
            },
            Ok(p) => PredictionOutcome::Degraded {
                reason: format!("non-finite probability {p}"),
                model_id,
            },
            Err(e) => {
                tracing::warn!(model_id = %model_id, error = %e, "predictor degraded to heuristic-only scoring");
                PredictionOutcome::Degraded {
                    reason: e.to_string(),
                    model_id,
                }
            }
        }
    }
}
