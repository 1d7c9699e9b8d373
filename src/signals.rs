//! Heuristic risk signals derived from request context and wall-clock time

use chrono::{Datelike, Local, NaiveDateTime, Timelike, Weekday};
use std::collections::{BTreeMap, HashSet};

use crate::config_loader::SignalConfig;
use crate::errors::{AssureError, AssureResult};
use crate::risk_types::{ActionRequest, Signal, SignalSet};

/// Source of the local time used for the temporal signal
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always reports the same instant
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

pub struct SignalExtractor {
    risky_weekday: Weekday,
    safe_start: u32,
    safe_end: u32,
    temporal_bonus: f64,
    production_environment: String,
    environment_bonus: f64,
    dangerous_actions: HashSet<String>,
    dangerous_severity: f64,
    baseline_severity: f64,
    force_markers: Vec<String>,
    payload_bonus: f64,
}

impl SignalExtractor {
    pub fn from_config(config: &SignalConfig) -> AssureResult<Self> {
        let risky_weekday = config.risky_weekday.parse::<Weekday>().map_err(|_| {
            AssureError::config(format!(
                "signals.risky_weekday is not a weekday: {}",
                config.risky_weekday
            ))
        })?;

        Ok(Self {
            risky_weekday,
            safe_start: config.safe_window_start,
            safe_end: config.safe_window_end,
            temporal_bonus: config.temporal_bonus,
            production_environment: config.production_environment.to_uppercase(),
            environment_bonus: config.environment_bonus,
            dangerous_actions: config
                .dangerous_actions
                .iter()
                .map(|a| a.to_uppercase())
                .collect(),
            dangerous_severity: config.dangerous_severity,
            baseline_severity: config.baseline_severity,
            force_markers: config.force_markers.iter().map(|m| m.to_lowercase()).collect(),
            payload_bonus: config.payload_bonus,
        })
    }

    pub fn is_production(&self, request: &ActionRequest) -> bool {
        request.environment.to_uppercase() == self.production_environment
    }

    pub fn is_risky_window(&self, now: NaiveDateTime) -> bool {
        let hour = now.hour();
        now.weekday() == self.risky_weekday && (hour < self.safe_start || hour > self.safe_end)
    }

    pub fn is_dangerous_action(&self, request: &ActionRequest) -> bool {
        self.dangerous_actions
            .contains(&request.action_type.to_uppercase())
    }

    /// True when any force marker appears as a whole token of the payload text
    pub fn has_force_flag(&self, request: &ActionRequest) -> bool {
        let text = request.payload_text().to_lowercase();
        text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
            .any(|token| self.force_markers.iter().any(|m| m == token))
    }

    pub fn extract(&self, request: &ActionRequest, now: NaiveDateTime) -> SignalSet {
        let mut values = BTreeMap::new();

        let temporal = if self.is_risky_window(now) {
            self.temporal_bonus
        } else {
            0.0
        };
        values.insert(Signal::Temporal, temporal);

        let environment = if self.is_production(request) {
            self.environment_bonus
        } else {
            0.0
        };
        values.insert(Signal::Environment, environment);

        let severity = if self.is_dangerous_action(request) {
            self.dangerous_severity
        } else {
            self.baseline_severity
        };
        values.insert(Signal::ActionSeverity, severity);

        let payload = if self.has_force_flag(request) {
            self.payload_bonus
        } else {
            0.0
        };
        values.insert(Signal::Payload, payload);

        SignalSet::from_values(values)
    }
}
