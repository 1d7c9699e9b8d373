//! Feedback-driven adjustment of the shared bias table
//!
//! Readers take a cloned snapshot under a read lock, so synthesis never
//! sees a half-applied step. Writers are serialized by `persist_lock`,
//! which is held across mutate-and-persist so the file always reflects the
//! latest in-memory table.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use crate::bias_table::{BiasBounds, BiasStore, BiasTable};
use crate::config_loader::LearningConfig;
use crate::errors::{AssureResult, SafeLock, SafeReadLock, SafeWriteLock};

/// What one reinforcement step did
#[derive(Debug, Clone, Serialize)]
pub struct ReinforceOutcome {
    pub new_weights: BTreeMap<String, f64>,
    pub total_evaluations: u64,
    pub adjusted: Vec<String>,
    /// False when the table could not be written; it is still live in memory
    pub persisted: bool,
}

pub struct LearningCore {
    table: RwLock<BiasTable>,
    store: BiasStore,
    persist_lock: Mutex<()>,
    persistence_degraded: AtomicBool,
    reward_factor: f64,
    penalty_factor: f64,
    bounds: BiasBounds,
}

impl LearningCore {
    /// Load the table from `store`, falling back to defaults
    pub fn load(store: BiasStore, config: &LearningConfig) -> Self {
        let bounds = BiasBounds {
            floor: config.bias_floor,
            ceiling: config.bias_ceiling,
        };
        let table = store.load_or_default(bounds);
        Self {
            table: RwLock::new(table),
            store,
            persist_lock: Mutex::new(()),
            persistence_degraded: AtomicBool::new(false),
            reward_factor: config.reward_factor,
            penalty_factor: config.penalty_factor,
            bounds,
        }
    }

    /// Copy of the current table
    pub fn snapshot(&self) -> AssureResult<BiasTable> {
        Ok(self.table.safe_read()?.clone())
    }

    pub fn get_bias(&self, name: &str) -> AssureResult<f64> {
        Ok(self.table.safe_read()?.get_bias(name))
    }

    pub fn persistence_degraded(&self) -> bool {
        self.persistence_degraded.load(Ordering::SeqCst)
    }

    /// Reward (`verdict_correct`) or penalize the named features, then
    /// persist the whole table. Unknown names are ignored. A failed write
    /// is logged and flagged, not returned.
    pub fn reinforce(&self, features: &[String], verdict_correct: bool) -> AssureResult<ReinforceOutcome> {
        let factor = if verdict_correct {
            self.reward_factor
        } else {
            self.penalty_factor
        };

        let _writer = self.persist_lock.safe_lock()?;
        let (updated, adjusted) = {
            let mut table = self.table.safe_write()?;
            let adjusted = table.apply(features, factor, self.bounds);
            (table.clone(), adjusted)
        };

        let persisted = match self.store.persist(&updated) {
            Ok(()) => {
                if self.persistence_degraded.swap(false, Ordering::SeqCst) {
                    tracing::info!(path = %self.store.path().display(), "bias table persistence recovered");
                }
                true
            }
            Err(e) => {
                self.persistence_degraded.store(true, Ordering::SeqCst);
                tracing::warn!(
                    path = %self.store.path().display(),
                    error = %e,
                    "failed to persist bias table, keeping in-memory weights"
                );
                false
            }
        };

        tracing::info!(
            correct = verdict_correct,
            adjusted = ?adjusted,
            total_evaluations = updated.total_evaluations,
            "reinforcement step applied"
        );

        Ok(ReinforceOutcome {
            new_weights: updated.feature_bias,
            total_evaluations: updated.total_evaluations,
            adjusted,
            persisted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn core_in(dir: &std::path::Path) -> LearningCore {
        LearningCore::load(
            BiasStore::new(dir.join("feature_bias.json")),
            &LearningConfig::default(),
        )
    }

    #[test]
    fn correct_verdict_rewards_named_features_only() {
        let dir = tempdir().unwrap();
        let core = core_in(dir.path());

        let outcome = core.reinforce(&["env".into(), "unknown".into()], true).unwrap();
        assert!(outcome.persisted);
        assert_eq!(outcome.adjusted, vec!["env".to_string()]);
        assert!((core.get_bias("env").unwrap() - 1.05).abs() < 1e-12);
        assert_eq!(core.get_bias("payload").unwrap(), 1.0);
        assert_eq!(outcome.total_evaluations, 1);
    }

    #[test]
    fn fifty_penalties_settle_on_the_floor() {
        let dir = tempdir().unwrap();
        let core = core_in(dir.path());

        let mut previous = core.get_bias("env").unwrap();
        for _ in 0..50 {
            core.reinforce(&["env".into()], false).unwrap();
            let current = core.get_bias("env").unwrap();
            assert!(current < previous || current == 0.4);
            assert!(current >= 0.4);
            previous = current;
        }
        assert_eq!(core.get_bias("env").unwrap(), 0.4);
        assert_eq!(core.snapshot().unwrap().total_evaluations, 50);
    }

    #[test]
    fn rewards_never_overshoot_the_ceiling() {
        let dir = tempdir().unwrap();
        let core = core_in(dir.path());
        for _ in 0..200 {
            core.reinforce(&["ml".into()], true).unwrap();
        }
        assert_eq!(core.get_bias("ml").unwrap(), 3.0);
    }

    #[test]
    fn state_survives_a_restart() {
        let dir = tempdir().unwrap();
        {
            let core = core_in(dir.path());
            core.reinforce(&["payload".into()], false).unwrap();
        }
        let reloaded = core_in(dir.path());
        assert!((reloaded.get_bias("payload").unwrap() - 0.92).abs() < 1e-12);
        assert_eq!(reloaded.snapshot().unwrap().total_evaluations, 1);
    }

    #[test]
    fn write_failure_keeps_memory_and_flags_degraded() {
        let dir = tempdir().unwrap();
        // a directory where the file should be makes the rename fail
        let target = dir.path().join("feature_bias.json");
        std::fs::create_dir_all(target.join("occupied")).unwrap();
        let core = LearningCore::load(BiasStore::new(target), &LearningConfig::default());

        let outcome = core.reinforce(&["temporal".into()], true).unwrap();
        assert!(!outcome.persisted);
        assert!(core.persistence_degraded());
        assert!((core.get_bias("temporal").unwrap() - 1.05).abs() < 1e-12);
    }

    #[test]
    fn reads_are_idempotent_without_writes() {
        let dir = tempdir().unwrap();
        let core = core_in(dir.path());
        let first = core.get_bias("action").unwrap();
        for _ in 0..10 {
            assert_eq!(core.get_bias("action").unwrap(), first);
        }
    }

    #[test]
    fn concurrent_feedback_is_fully_counted() {
        let dir = tempdir().unwrap();
        let core = Arc::new(core_in(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let core = core.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        core.reinforce(&["blast_radius".into()], i % 2 == 0).unwrap();
                        let snapshot = core.snapshot().unwrap();
                        let value = snapshot.get_bias("blast_radius");
                        assert!((0.4..=3.0).contains(&value));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(core.snapshot().unwrap().total_evaluations, 40);
        let on_disk = BiasStore::new(dir.path().join("feature_bias.json")).read().unwrap();
        assert_eq!(on_disk, core.snapshot().unwrap());
    }
}
