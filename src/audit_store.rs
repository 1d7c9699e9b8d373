//! Hash-linked evaluation ledger backed by sled
//!
//! Each record stores `hash = sha256(prev_hash || entry_json)`. Keys are
//! monotonically increasing ids from `Db::generate_id`, so iteration order
//! is append order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

use crate::errors::{AssureError, AssureResult, SafeLock};
use crate::risk_types::{ActionRequest, EvaluationResult, Verdict};

const TREE_NAME: &str = "evaluations";

/// The hashed part of a ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    pub environment: String,
    pub operator_id: String,
    pub risk_score: f64,
    pub verdict: Verdict,
}

impl LedgerEntry {
    pub fn from_evaluation(request: &ActionRequest, result: &EvaluationResult) -> Self {
        Self {
            id: result.evaluation_id.clone(),
            timestamp: Utc::now(),
            action_type: request.action_type.clone(),
            environment: request.environment.clone(),
            operator_id: request.operator_id.clone(),
            risk_score: result.risk_score,
            verdict: result.verdict,
        }
    }
}

/// A chained record. `entry_json` holds the exact bytes that were hashed;
/// `entry` is the decoded view and must agree with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub entry: LedgerEntry,
    pub entry_json: String,
    pub prev_hash: Option<String>,
    pub hash: String,
}

fn chain_hash(prev_hash: Option<&str>, entry_json: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(entry_json.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn decode(bytes: &[u8]) -> AssureResult<LedgerRecord> {
    serde_json::from_slice(bytes).map_err(|e| AssureError::serialization("decoding ledger record", e))
}

pub struct EvaluationLedger {
    db: sled::Db,
    tree: sled::Tree,
    // serializes read-last-hash + insert
    append_lock: Mutex<()>,
}

impl EvaluationLedger {
    pub fn open(path: impl AsRef<Path>) -> AssureResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .map_err(|e| AssureError::ledger(format!("opening {}", path.display()), e))?;
        let tree = db
            .open_tree(TREE_NAME)
            .map_err(|e| AssureError::ledger("opening evaluations tree", e))?;
        Ok(Self {
            db,
            tree,
            append_lock: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn last_hash(&self) -> AssureResult<Option<String>> {
        match self.tree.last().map_err(|e| AssureError::ledger("reading ledger head", e))? {
            Some((_, bytes)) => Ok(Some(decode(&bytes)?.hash)),
            None => Ok(None),
        }
    }

    /// Link `entry` onto the chain and flush it
    pub fn append(&self, entry: LedgerEntry) -> AssureResult<LedgerRecord> {
        let _guard = self.append_lock.safe_lock()?;

        let prev_hash = self.last_hash()?;
        let entry_json = serde_json::to_string(&entry)
            .map_err(|e| AssureError::serialization("encoding ledger entry", e))?;
        let hash = chain_hash(prev_hash.as_deref(), &entry_json);
        let record = LedgerRecord {
            entry,
            entry_json,
            prev_hash,
            hash,
        };

        let key = self
            .db
            .generate_id()
            .map_err(|e| AssureError::ledger("allocating ledger key", e))?;
        let value = serde_json::to_vec(&record)
            .map_err(|e| AssureError::serialization("encoding ledger record", e))?;
        self.tree
            .insert(key.to_be_bytes(), value)
            .map_err(|e| AssureError::ledger("inserting ledger record", e))?;
        self.tree
            .flush()
            .map_err(|e| AssureError::ledger("flushing ledger", e))?;

        Ok(record)
    }

    /// Up to `limit` records, newest first
    pub fn recent(&self, limit: usize) -> AssureResult<Vec<LedgerRecord>> {
        let mut records = Vec::with_capacity(limit.min(self.len()));
        for item in self.tree.iter().rev().take(limit) {
            let (_, bytes) = item.map_err(|e| AssureError::ledger("scanning ledger", e))?;
            records.push(decode(&bytes)?);
        }
        Ok(records)
    }

    /// Re-walk the chain from the start. Returns the number of records.
    pub fn verify(&self) -> AssureResult<usize> {
        let mut prev: Option<String> = None;
        let mut count = 0;
        for item in self.tree.iter() {
            let (_, bytes) = item.map_err(|e| AssureError::ledger("scanning ledger", e))?;
            let record = decode(&bytes)?;
            let expected = chain_hash(prev.as_deref(), &record.entry_json);
            let hashed: LedgerEntry = serde_json::from_str(&record.entry_json)
                .map_err(|e| AssureError::serialization("decoding hashed ledger entry", e))?;
            if record.prev_hash != prev || record.hash != expected || hashed != record.entry {
                return Err(AssureError::ChainBroken {
                    id: record.entry.id,
                });
            }
            prev = Some(record.hash);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: &str, score: f64, verdict: Verdict) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            timestamp: Utc::now(),
            action_type: "FORCE_DELETE".into(),
            environment: "production".into(),
            operator_id: "ops-7".into(),
            risk_score: score,
            verdict,
        }
    }

    #[test]
    fn appends_link_to_the_previous_hash() {
        let dir = tempdir().unwrap();
        let ledger = EvaluationLedger::open(dir.path().join("ledger")).unwrap();

        let first = ledger.append(entry("a", 12.5, Verdict::Allow)).unwrap();
        let second = ledger.append(entry("b", 88.0, Verdict::Block)).unwrap();

        assert!(first.prev_hash.is_none());
        assert_eq!(second.prev_hash.as_deref(), Some(first.hash.as_str()));
        assert_eq!(ledger.verify().unwrap(), 2);
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let dir = tempdir().unwrap();
        let ledger = EvaluationLedger::open(dir.path().join("ledger")).unwrap();
        for i in 0..5 {
            ledger.append(entry(&format!("e{i}"), i as f64, Verdict::Allow)).unwrap();
        }

        let recent = ledger.recent(3).unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["e4", "e3", "e2"]);
        assert_eq!(ledger.recent(50).unwrap().len(), 5);
    }

    #[test]
    fn tampering_breaks_verification() {
        let dir = tempdir().unwrap();
        let ledger = EvaluationLedger::open(dir.path().join("ledger")).unwrap();
        ledger.append(entry("a", 91.0, Verdict::Block)).unwrap();
        ledger.append(entry("b", 10.0, Verdict::Allow)).unwrap();

        let (key, bytes) = ledger.tree.first().unwrap().unwrap();
        let mut record = decode(&bytes).unwrap();
        record.entry.verdict = Verdict::Allow;
        ledger
            .tree
            .insert(key, serde_json::to_vec(&record).unwrap())
            .unwrap();

        match ledger.verify() {
            Err(AssureError::ChainBroken { id }) => assert_eq!(id, "a"),
            other => panic!("expected broken chain, got {other:?}"),
        }
    }

    #[test]
    fn scores_with_full_precision_verify() {
        let dir = tempdir().unwrap();
        let ledger = EvaluationLedger::open(dir.path().join("ledger")).unwrap();
        ledger.append(entry("a", 84.45837617203871, Verdict::Block)).unwrap();
        ledger.append(entry("b", 12.759252473347427, Verdict::Allow)).unwrap();
        ledger.append(entry("c", 0.1 + 0.2, Verdict::Allow)).unwrap();

        assert_eq!(ledger.verify().unwrap(), 3);
        let newest = &ledger.recent(1).unwrap()[0];
        assert_eq!(newest.entry.risk_score, 0.1 + 0.2);
    }

    #[test]
    fn edited_hashed_bytes_break_verification() {
        let dir = tempdir().unwrap();
        let ledger = EvaluationLedger::open(dir.path().join("ledger")).unwrap();
        ledger.append(entry("a", 91.0, Verdict::Block)).unwrap();

        let (key, bytes) = ledger.tree.first().unwrap().unwrap();
        let mut record = decode(&bytes).unwrap();
        record.entry_json = record.entry_json.replace("BLOCK", "ALLOW");
        ledger
            .tree
            .insert(key, serde_json::to_vec(&record).unwrap())
            .unwrap();

        assert!(matches!(ledger.verify(), Err(AssureError::ChainBroken { .. })));
    }

    #[test]
    fn chain_continues_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger");
        {
            let ledger = EvaluationLedger::open(&path).unwrap();
            ledger.append(entry("a", 40.0, Verdict::Allow)).unwrap();
        }
        let ledger = EvaluationLedger::open(&path).unwrap();
        ledger.append(entry("b", 60.0, Verdict::Warn)).unwrap();
        assert_eq!(ledger.verify().unwrap(), 2);
    }
}
