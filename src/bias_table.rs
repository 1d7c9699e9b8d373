//! Feature bias multipliers and their durable record
//!
//! The persisted form is a single JSON document:
//! `{ "feature_bias": { name: multiplier }, "total_evaluations": n }`.
//! Writes go to a sibling temp file which is fsynced and renamed over the
//! target, so a crash mid-write leaves the previous table intact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::{AssureError, AssureResult};
use crate::risk_types::{Signal, BLAST_FEATURE, ML_FEATURE};

/// Multiplier reported for features the table does not know
pub const NEUTRAL_BIAS: f64 = 1.0;

/// Inclusive bounds every multiplier is clamped into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasBounds {
    pub floor: f64,
    pub ceiling: f64,
}

impl Default for BiasBounds {
    fn default() -> Self {
        Self {
            floor: 0.4,
            ceiling: 3.0,
        }
    }
}

impl BiasBounds {
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return NEUTRAL_BIAS.clamp(self.floor, self.ceiling);
        }
        value.clamp(self.floor, self.ceiling)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasTable {
    pub feature_bias: BTreeMap<String, f64>,
    #[serde(default)]
    pub total_evaluations: u64,
}

impl Default for BiasTable {
    fn default() -> Self {
        let mut feature_bias = BTreeMap::new();
        for signal in Signal::ALL {
            feature_bias.insert(signal.bias_feature().to_string(), NEUTRAL_BIAS);
        }
        feature_bias.insert(ML_FEATURE.to_string(), NEUTRAL_BIAS);
        feature_bias.insert(BLAST_FEATURE.to_string(), NEUTRAL_BIAS);
        Self {
            feature_bias,
            total_evaluations: 0,
        }
    }
}

impl BiasTable {
    pub fn get_bias(&self, name: &str) -> f64 {
        self.feature_bias.get(name).copied().unwrap_or(NEUTRAL_BIAS)
    }

    /// Scale each known feature once by `factor`, clamp it, and count the
    /// step. Returns the names that were actually present.
    pub(crate) fn apply(&mut self, features: &[String], factor: f64, bounds: BiasBounds) -> Vec<String> {
        let mut touched = Vec::new();
        for name in features {
            if touched.contains(name) {
                continue;
            }
            if let Some(value) = self.feature_bias.get_mut(name) {
                *value = bounds.clamp(*value * factor);
                touched.push(name.clone());
            }
        }
        self.total_evaluations = self.total_evaluations.saturating_add(1);
        touched
    }

    /// Pull any out-of-range values from an older record back into bounds
    fn normalized(mut self, bounds: BiasBounds) -> Self {
        for value in self.feature_bias.values_mut() {
            *value = bounds.clamp(*value);
        }
        self
    }
}

/// File-backed home of the bias table
#[derive(Debug, Clone)]
pub struct BiasStore {
    path: PathBuf,
}

impl BiasStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> AssureResult<BiasTable> {
        let bytes = fs::read(&self.path)
            .map_err(|e| AssureError::persistence(format!("reading {}", self.path.display()), e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AssureError::serialization(format!("parsing {}", self.path.display()), e))
    }

    /// Load the persisted table, or the default table when the record is
    /// missing or unreadable. Never fails.
    pub fn load_or_default(&self, bounds: BiasBounds) -> BiasTable {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "no persisted bias table, starting from defaults");
            return BiasTable::default();
        }
        match self.read() {
            Ok(table) => {
                tracing::info!(
                    path = %self.path.display(),
                    features = table.feature_bias.len(),
                    total_evaluations = table.total_evaluations,
                    "loaded bias table"
                );
                table.normalized(bounds)
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "bias table unreadable, falling back to defaults");
                BiasTable::default()
            }
        }
    }

    /// Atomically replace the persisted record with `table`
    pub fn persist(&self, table: &BiasTable) -> AssureResult<()> {
        let encoded = serde_json::to_vec_pretty(table)
            .map_err(|e| AssureError::serialization("encoding bias table", e))?;

        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent)
                .map_err(|e| AssureError::persistence("creating bias table directory", e))?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path)
            .map_err(|e| AssureError::persistence("creating bias table temp file", e))?;
        tmp.write_all(&encoded)
            .and_then(|_| tmp.sync_all())
            .map_err(|e| AssureError::persistence("writing bias table temp file", e))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| AssureError::persistence("renaming bias table into place", e))?;

        // best-effort directory sync so the rename itself is durable
        if let Some(parent) = parent {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}
