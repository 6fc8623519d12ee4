//! Z-score detector for scope keys without configured rules

use crate::config::FallbackConfig;
use crate::models::OutcomeCounts;

use super::evaluator::Verdict;

/// Outcome of the statistical check for one snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackEvaluation {
    pub approval_rate: f64,
    pub z_score: f64,
    pub verdict: Verdict,
}

/// Flags approval rates that fall too far below an assumed baseline
#[derive(Debug, Clone)]
pub struct FallbackDetector {
    baseline: f64,
    stddev: f64,
    z_threshold: f64,
    min_transactions: u64,
}

impl FallbackDetector {
    pub fn new(config: &FallbackConfig) -> Self {
        Self {
            baseline: config.baseline_approval_rate,
            stddev: config.stddev,
            z_threshold: config.z_threshold,
            min_transactions: config.min_transactions,
        }
    }

    /// `(baseline - approval_rate) / stddev`; positive when below baseline
    pub fn z_score(&self, approval_rate: f64) -> f64 {
        (self.baseline - approval_rate) / self.stddev
    }

    pub fn z_threshold(&self) -> f64 {
        self.z_threshold
    }

    pub fn evaluate(&self, counts: &OutcomeCounts) -> FallbackEvaluation {
        let approval_rate = counts.approval_rate();
        let z_score = self.z_score(approval_rate);

        let verdict = if counts.total() < self.min_transactions {
            Verdict::InsufficientSample
        } else if z_score > self.z_threshold {
            Verdict::Breached
        } else {
            Verdict::Clear
        };

        FallbackEvaluation {
            approval_rate,
            z_score,
            verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn detector() -> FallbackDetector {
        FallbackDetector::new(&FallbackConfig::default())
    }

    #[test]
    fn test_low_approval_flagged() {
        let evaluation = detector().evaluate(&OutcomeCounts::new(65, 20, 15));
        assert!((evaluation.z_score - 4.0).abs() < 1e-9);
        assert_eq!(evaluation.verdict, Verdict::Breached);
    }

    #[test]
    fn test_mild_dip_not_flagged() {
        let evaluation = detector().evaluate(&OutcomeCounts::new(80, 15, 5));
        assert!((evaluation.z_score - 1.0).abs() < 1e-9);
        assert_eq!(evaluation.verdict, Verdict::Clear);
    }

    #[test]
    fn test_small_sample_ignored() {
        let evaluation = detector().evaluate(&OutcomeCounts::new(0, 10, 10));
        assert_eq!(evaluation.verdict, Verdict::InsufficientSample);
    }

    proptest! {
        #[test]
        fn prop_z_score_decreases_with_approval(a in 0.0f64..1.0, b in 0.0f64..1.0) {
            let d = detector();
            if a < b {
                prop_assert!(d.z_score(a) >= d.z_score(b));
            }
        }
    }
}
