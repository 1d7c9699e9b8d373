use crate::config_loader::VerdictConfig;
use crate::risk_types::Verdict;

/// Maps a bounded score to a verdict tier.
///
/// `score > threshold` blocks, `score > threshold / warn_divisor` warns,
/// anything else is allowed. For a fixed threshold the mapping is
/// monotonic in the score.
#[derive(Debug, Clone)]
pub struct VerdictClassifier {
    default_threshold: f64,
    warn_divisor: f64,
}

impl VerdictClassifier {
    pub fn new(config: &VerdictConfig) -> Self {
        Self {
            default_threshold: config.default_threshold,
            warn_divisor: config.warn_divisor,
        }
    }

    /// Request threshold, or the configured default when absent or not finite
    pub fn effective_threshold(&self, requested: Option<f64>) -> f64 {
        requested
            .filter(|t| t.is_finite())
            .unwrap_or(self.default_threshold)
    }

    pub fn classify(&self, score: f64, threshold: f64) -> Verdict {
        if score > threshold {
            Verdict::Block
        } else if score > threshold / self.warn_divisor {
            Verdict::Warn
        } else {
            Verdict::Allow
        }
    }
}
