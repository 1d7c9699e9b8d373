//! The evaluation pipeline
//!
//! A request fans out to the signal extractor, the dependency graph and the
//! predictor concurrently; the synthesizer joins them with a bias snapshot,
//! then the classifier and explainer shape the response. Feedback flows only
//! through the learning core.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::audit_store::{EvaluationLedger, LedgerEntry, LedgerRecord};
use crate::bias_table::{BiasStore, BiasTable};
use crate::config_loader::EngineConfig;
use crate::dependency_graph::DependencyGraph;
use crate::errors::AssureResult;
use crate::explainer::Explainer;
use crate::jitter::{self, Jitter};
use crate::learning::{LearningCore, ReinforceOutcome};
use crate::predictor::{PredictionOutcome, PredictorFeatures, PredictorState};
use crate::risk_types::{ActionRequest, EvaluationResult, Forensics};
use crate::signals::{Clock, SignalExtractor, SystemClock};
use crate::synthesizer::RiskSynthesizer;
use crate::verdict::VerdictClassifier;

pub const ENGINE_NAME: &str = "assure_engine";

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub engine: &'static str,
    pub version: &'static str,
    pub mode: &'static str,
    pub model_id: Option<String>,
    pub persistence: &'static str,
    pub total_evaluations: u64,
}

pub struct RiskEngine {
    extractor: SignalExtractor,
    graph: Arc<DependencyGraph>,
    predictor: PredictorState,
    learning: Arc<LearningCore>,
    synthesizer: RiskSynthesizer,
    classifier: VerdictClassifier,
    explainer: Explainer,
    jitter: Box<dyn Jitter>,
    clock: Arc<dyn Clock>,
    ledger: Option<Arc<EvaluationLedger>>,
}

fn load_graph(config: &EngineConfig) -> AssureResult<DependencyGraph> {
    match config.graph.path.as_deref() {
        Some(path) if Path::new(path).exists() => DependencyGraph::from_file(path),
        Some(path) => {
            tracing::warn!(path, "graph file not found, using bundled topology");
            DependencyGraph::bundled()
        }
        None => DependencyGraph::bundled(),
    }
}

impl RiskEngine {
    /// Assemble the engine from validated configuration
    pub fn from_config(config: &EngineConfig) -> AssureResult<Self> {
        let extractor = SignalExtractor::from_config(&config.signals)?;
        let graph = Arc::new(load_graph(config)?);
        let predictor = PredictorState::from_config(&config.predictor)?;
        let learning = Arc::new(LearningCore::load(
            BiasStore::new(&config.storage.bias_path),
            &config.learning,
        ));

        let ledger = if config.storage.audit_enabled {
            match EvaluationLedger::open(&config.storage.audit_path) {
                Ok(ledger) => Some(Arc::new(ledger)),
                Err(e) => {
                    tracing::warn!(
                        path = %config.storage.audit_path,
                        error = %e,
                        "evaluation ledger unavailable, continuing without audit records"
                    );
                    None
                }
            }
        } else {
            None
        };

        tracing::info!(
            nodes = graph.node_count(),
            predictor = predictor.model_id().unwrap_or("none"),
            audit = ledger.is_some(),
            "risk engine ready"
        );

        Ok(Self {
            extractor,
            graph,
            predictor,
            learning,
            synthesizer: RiskSynthesizer::new(&config.synthesis),
            classifier: VerdictClassifier::new(&config.verdict),
            explainer: Explainer::new(&config.explain),
            jitter: jitter::from_config(&config.synthesis),
            clock: Arc::new(SystemClock),
            ledger,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_predictor(mut self, predictor: PredictorState) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_jitter(mut self, jitter: Box<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn ledger(&self) -> Option<&EvaluationLedger> {
        self.ledger.as_deref()
    }

    /// Score one request. Never fails: predictor and ledger problems
    /// degrade the result instead of aborting it.
    pub async fn evaluate(&self, request: &ActionRequest) -> EvaluationResult {
        let now = self.clock.now();
        let features = PredictorFeatures::new(request, &self.extractor, now);
        let impact_text = request.impact_text();

        let (signals, blast, prediction) = tokio::join!(
            async { self.extractor.extract(request, now) },
            async { self.graph.calculate_blast_radius(&impact_text) },
            self.predictor.predict(&features),
        );

        let biases = self.learning.snapshot().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "bias table unreadable, scoring with neutral weights");
            BiasTable::default()
        });

        let synthesis = self
            .synthesizer
            .synthesize(&signals, &blast, &prediction, &biases, self.jitter.as_ref());
        let threshold = self.classifier.effective_threshold(request.threshold);
        let verdict = self.classifier.classify(synthesis.score, threshold);
        let reasoning = self.explainer.explain(&signals, &blast, &prediction);

        let (model_id, degraded, attribution) = match &prediction {
            PredictionOutcome::Predicted {
                model_id,
                attribution,
                ..
            } => (Some(model_id.clone()), None, attribution.clone()),
            PredictionOutcome::Degraded { model_id, reason } => {
                (Some(model_id.clone()), Some(reason.clone()), None)
            }
            PredictionOutcome::Unavailable { reason } => (None, Some(reason.clone()), None),
        };

        let result = EvaluationResult {
            evaluation_id: uuid::Uuid::new_v4().to_string(),
            risk_score: synthesis.score,
            verdict,
            reasoning,
            signals: signals.to_named(),
            breakdown: synthesis.breakdown,
            ml_confidence: prediction.probability().unwrap_or(0.0),
            forensics: Some(Forensics {
                blast_radius: blast.score,
                reachable_nodes: blast.reachable,
                impacted_seeds: blast.seeds,
                semantic_signal: prediction.probability(),
                model_id,
                degraded,
                attribution,
            }),
        };

        if let Some(ledger) = &self.ledger {
            // sled insert + flush is blocking disk I/O
            let ledger = Arc::clone(ledger);
            let entry = LedgerEntry::from_evaluation(request, &result);
            match tokio::task::spawn_blocking(move || ledger.append(entry)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(evaluation_id = %result.evaluation_id, error = %e, "failed to record evaluation");
                }
                Err(e) => {
                    tracing::warn!(evaluation_id = %result.evaluation_id, error = %e, "ledger task failed");
                }
            }
        }

        tracing::info!(
            evaluation_id = %result.evaluation_id,
            operator = %request.operator_id,
            action = %request.action_type,
            score = result.risk_score,
            verdict = %result.verdict,
            heuristic_only = synthesis.heuristic_only,
            "evaluation complete"
        );

        result
    }

    pub fn reinforce(&self, features: &[String], verdict_correct: bool) -> AssureResult<ReinforceOutcome> {
        self.learning.reinforce(features, verdict_correct)
    }

    pub fn weights(&self) -> AssureResult<BiasTable> {
        self.learning.snapshot()
    }

    pub fn recent_evaluations(&self, limit: usize) -> AssureResult<Vec<LedgerRecord>> {
        match &self.ledger {
            Some(ledger) => ledger.recent(limit),
            None => Ok(Vec::new()),
        }
    }

    pub fn health(&self) -> HealthReport {
        let total_evaluations = self
            .learning
            .snapshot()
            .map(|t| t.total_evaluations)
            .unwrap_or(0);
        HealthReport {
            status: "online",
            engine: ENGINE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            mode: if self.predictor.is_available() {
                "ML_ACTIVE"
            } else {
                "HEURISTIC_ONLY"
            },
            model_id: self.predictor.model_id().map(str::to_string),
            persistence: if self.learning.persistence_degraded() {
                "degraded"
            } else {
                "ok"
            },
            total_evaluations,
        }
    }
}
