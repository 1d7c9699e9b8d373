//! Request, signal and result types shared across the engine

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// An operator-initiated action awaiting a verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_type: String,
    pub environment: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default = "unknown_operator")]
    pub operator_id: String,
    /// Falls back to the configured default threshold when absent
    #[serde(default)]
    pub threshold: Option<f64>,
}

fn unknown_operator() -> String {
    "unknown".to_string()
}

impl ActionRequest {
    pub fn new(action_type: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            environment: environment.into(),
            payload: Map::new(),
            operator_id: unknown_operator(),
            threshold: None,
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_operator(mut self, operator_id: impl Into<String>) -> Self {
        self.operator_id = operator_id.into();
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// JSON text of the payload, the form scanned for force markers
    pub fn payload_text(&self) -> String {
        Value::Object(self.payload.clone()).to_string()
    }

    /// Text searched for dependency-graph keywords
    pub fn impact_text(&self) -> String {
        format!("{} {}", self.action_type, self.payload_text())
    }
}

/// The fixed set of heuristic signals, in explanation priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Signal {
    Environment,
    Temporal,
    Payload,
    ActionSeverity,
}

impl Signal {
    pub const ALL: [Signal; 4] = [
        Signal::Temporal,
        Signal::Environment,
        Signal::ActionSeverity,
        Signal::Payload,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Signal::Temporal => "temporal",
            Signal::Environment => "environment",
            Signal::ActionSeverity => "action_severity",
            Signal::Payload => "payload",
        }
    }

    /// Bias-table feature that scales this signal
    pub fn bias_feature(self) -> &'static str {
        match self {
            Signal::Temporal => "temporal",
            Signal::Environment => "env",
            Signal::ActionSeverity => "action",
            Signal::Payload => "payload",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bias feature scaling the predictor term
pub const ML_FEATURE: &str = "ml";
/// Bias feature scaling the blast-radius impact term
pub const BLAST_FEATURE: &str = "blast_radius";

/// Heuristic signal contributions for one request. Built once by the
/// extractor and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSet {
    values: BTreeMap<Signal, f64>,
}

impl SignalSet {
    pub(crate) fn from_values(values: BTreeMap<Signal, f64>) -> Self {
        Self { values }
    }

    pub fn get(&self, signal: Signal) -> f64 {
        self.values.get(&signal).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Signal, f64)> + '_ {
        self.values.iter().map(|(s, v)| (*s, *v))
    }

    pub fn total(&self) -> f64 {
        self.values.values().sum()
    }

    /// Signal name to value, the wire form of `signals`
    pub fn to_named(&self) -> BTreeMap<String, f64> {
        self.iter().map(|(s, v)| (s.name().to_string(), v)).collect()
    }
}

/// Downstream impact of a request derived from graph reachability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRadiusResult {
    pub score: f64,
    /// Descendants summed across every matched seed node
    pub reachable: usize,
    pub seeds: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Allow,
    Warn,
    Block,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Warn => "WARN",
            Verdict::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supporting detail attached to an evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forensics {
    pub blast_radius: f64,
    pub reachable_nodes: usize,
    pub impacted_seeds: Vec<String>,
    /// Predictor probability; absent when scoring was heuristic-only
    pub semantic_signal: Option<f64>,
    pub model_id: Option<String>,
    pub degraded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub evaluation_id: String,
    pub risk_score: f64,
    pub verdict: Verdict,
    pub reasoning: Vec<String>,
    pub signals: BTreeMap<String, f64>,
    pub breakdown: BTreeMap<String, f64>,
    pub ml_confidence: f64,
    pub forensics: Option<Forensics>,
}
