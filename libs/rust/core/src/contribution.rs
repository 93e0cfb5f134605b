//! Contribution accounting: turns a finished model's metric history into a
//! per-trainer credit split.
//!
//! Deltas are measured from the training baseline (global MSE at the first
//! recorded iteration) to each trainer's partial MSE at the last recorded
//! iteration. Percentages are floored, then the points lost to flooring are
//! handed out by largest remainder with ties going to the earlier
//! registered trainer, so a non-empty split always sums to exactly 100.

use serde::{Deserialize, Serialize};

use crate::ledger::{Iteration, MetricLedger, Mse};

pub type Percentage = u8;

/// Improvement from `initial` to `partial`, clamped at zero.
pub fn mse_difference(initial: Mse, partial: Mse) -> Mse { initial.saturating_sub(partial) }

/// `floor(delta * 100 / total)`; zero when there is nothing to split.
pub fn contribution_percentage(delta: Mse, total: Mse) -> Percentage {
    if total == 0 { return 0; }
    ((delta as u128 * 100) / total as u128).min(100) as Percentage
}

/// Splits 100 points across `deltas` in input order.
///
/// A zero total weights every entry equally.
pub fn split_percentages(deltas: &[Mse]) -> Vec<Percentage> {
    if deltas.is_empty() { return Vec::new(); }
    let total: u128 = deltas.iter().map(|d| *d as u128).sum();
    let weights: Vec<u128> = if total == 0 { vec![1; deltas.len()] } else { deltas.iter().map(|d| *d as u128).collect() };
    let total = if total == 0 { deltas.len() as u128 } else { total };

    let mut shares: Vec<Percentage> = weights.iter().map(|w| (w * 100 / total) as Percentage).collect();
    let assigned: u32 = shares.iter().map(|p| *p as u32).sum();
    let leftover = 100u32.saturating_sub(assigned) as usize;

    let mut order: Vec<usize> = (0..weights.len()).collect();
    // stable sort keeps registration order among equal remainders
    order.sort_by(|a, b| (weights[*b] * 100 % total).cmp(&(weights[*a] * 100 % total)));
    for idx in order.into_iter().take(leftover) { shares[idx] += 1; }
    shares
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerShare {
    pub trainer: String,
    pub delta: Mse,
    pub percentage: Percentage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionReport {
    pub baseline_iteration: Iteration,
    pub baseline_mse: Mse,
    pub final_iteration: Iteration,
    pub final_mse: Mse,
    pub improvement: Mse,
    pub shares: Vec<TrainerShare>,
}

impl ContributionReport {
    pub fn percentage_of(&self, trainer: &str) -> Option<Percentage> {
        self.shares.iter().find(|s| s.trainer == trainer).map(|s| s.percentage)
    }
}

/// Computes the split for `trainers` (registration order). Returns `None`
/// when the ledger holds no global MSE to anchor the baseline.
pub fn calculate_contributions(ledger: &MetricLedger, trainers: &[String]) -> Option<ContributionReport> {
    let (baseline_iteration, baseline_mse) = ledger.initial_global()?;
    let (final_iteration, final_mse) = ledger.final_global()?;
    let deltas: Vec<Mse> = trainers
        .iter()
        .map(|t| ledger.partial_mse(t, final_iteration).map(|p| mse_difference(baseline_mse, p)).unwrap_or(0))
        .collect();
    let percentages = split_percentages(&deltas);
    let shares = trainers
        .iter()
        .zip(deltas)
        .zip(percentages)
        .map(|((trainer, delta), percentage)| TrainerShare { trainer: trainer.clone(), delta, percentage })
        .collect();
    Some(ContributionReport {
        baseline_iteration,
        baseline_mse,
        final_iteration,
        final_mse,
        improvement: mse_difference(baseline_mse, final_mse),
        shares,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mse_difference_clamps_at_zero() {
        assert_eq!(mse_difference(900, 800), 100);
        assert_eq!(mse_difference(900, 900), 0);
        assert_eq!(mse_difference(800, 900), 0);
    }

    #[test]
    fn percentage_is_floored() {
        assert_eq!(contribution_percentage(100, 200), 50);
        assert_eq!(contribution_percentage(100, 300), 33);
        assert_eq!(contribution_percentage(5, 0), 0);
    }

    #[test]
    fn remainder_goes_to_largest_fraction() {
        assert_eq!(split_percentages(&[100, 200]), vec![33, 67]);
        assert_eq!(split_percentages(&[492, 502]), vec![49, 51]);
    }

    #[test]
    fn zero_total_splits_equally_in_registration_order() {
        assert_eq!(split_percentages(&[0, 0, 0]), vec![34, 33, 33]);
        assert_eq!(split_percentages(&[0]), vec![100]);
        assert!(split_percentages(&[]).is_empty());
    }

    #[test]
    fn split_always_sums_to_hundred() {
        let cases: [&[Mse]; 5] = [&[1, 1, 1], &[7, 0, 13, 2], &[u64::MAX, 1], &[3; 7], &[0, 42]];
        for deltas in cases {
            let sum: u32 = split_percentages(deltas).iter().map(|p| *p as u32).sum();
            assert_eq!(sum, 100, "deltas {deltas:?}");
        }
    }

    #[test]
    fn report_uses_last_iteration_against_baseline() {
        let mut ledger = MetricLedger::new();
        ledger.save_global_mse(0, 900).unwrap();
        ledger.save_partial_mse("t1", 0, 900).unwrap();
        ledger.save_partial_mse("t2", 0, 800).unwrap();
        ledger.save_global_mse(1, 800).unwrap();
        ledger.save_partial_mse("t1", 1, 890).unwrap();
        ledger.save_partial_mse("t2", 1, 700).unwrap();
        let trainers = vec!["t1".to_string(), "t2".to_string()];
        let report = calculate_contributions(&ledger, &trainers).unwrap();
        assert_eq!(report.improvement, 100);
        assert_eq!(report.shares[0].delta, 10);
        assert_eq!(report.shares[1].delta, 200);
        assert_eq!(report.percentage_of("t1"), Some(5));
        assert_eq!(report.percentage_of("t2"), Some(95));
    }

    #[test]
    fn missing_partial_counts_as_no_improvement() {
        let mut ledger = MetricLedger::new();
        ledger.save_global_mse(0, 1000).unwrap();
        ledger.save_global_mse(4, 600).unwrap();
        ledger.save_partial_mse("t1", 4, 700).unwrap();
        let trainers = vec!["t1".to_string(), "t2".to_string()];
        let report = calculate_contributions(&ledger, &trainers).unwrap();
        assert_eq!(report.percentage_of("t1"), Some(100));
        assert_eq!(report.percentage_of("t2"), Some(0));
    }

    #[test]
    fn no_global_mse_yields_none() {
        let mut ledger = MetricLedger::new();
        ledger.save_partial_mse("t1", 0, 10).unwrap();
        assert!(calculate_contributions(&ledger, &["t1".to_string()]).is_none());
    }
}
