use rayon::prelude::*;
use thiserror::Error;

use crate::types::models::{DistributionStats, GroupStat, Holder};

/// Holder-count percentile ranges, measured from the largest holder down.
const WALLET_GROUPS: [(u32, u32); 4] = [(0, 10), (10, 25), (25, 50), (50, 80)];

#[derive(Error, Debug, PartialEq)]
pub enum DistributionError {
    #[error("holder {address} has a non-finite balance")]
    NonFiniteBalance { address: String },
    #[error("total supply is not finite: {0}")]
    NonFiniteSupply(f64),
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Computes bucket and summary statistics for `holders`, which must already
/// be sorted largest balance first.
pub fn calculate_distribution(
    holders: &[Holder],
    total_supply: f64,
) -> Result<DistributionStats, DistributionError> {
    if !total_supply.is_finite() {
        return Err(DistributionError::NonFiniteSupply(total_supply));
    }
    if let Some(bad) = holders.iter().find(|h| !h.balance.is_finite()) {
        return Err(DistributionError::NonFiniteBalance {
            address: bad.address.clone(),
        });
    }

    let total_holders = holders.len();

    let group_stats: Vec<GroupStat> = WALLET_GROUPS
        .par_iter()
        .map(|&(range_start, range_end)| {
            let start = bucket_index(range_start, total_holders);
            let end = bucket_index(range_end, total_holders);
            let wallets = &holders[start..end];

            let cumulative: f64 = wallets.iter().map(|h| h.balance).sum();
            let percent = if total_supply > 0.0 {
                cumulative / total_supply * 100.0
            } else {
                0.0
            };

            GroupStat {
                range: format!("{}-{}%", range_start, range_end),
                account_count: wallets.len() as u32,
                percent_tokens_held: round2(percent),
                amount_tokens_held: round2(cumulative),
            }
        })
        .collect();

    let average_balance = if total_holders > 0 {
        total_supply / total_holders as f64
    } else {
        0.0
    };

    tracing::debug!(
        "Distribution over {} holders: average {:.2}",
        total_holders,
        average_balance
    );

    Ok(DistributionStats {
        total_holders,
        average_balance: round2(average_balance),
        median_balance: round2(median_balance(holders)),
        group_stats,
    })
}

fn bucket_index(percentile: u32, total_holders: usize) -> usize {
    percentile as usize * total_holders / 100
}

fn median_balance(holders: &[Holder]) -> f64 {
    let count = holders.len();
    if count == 0 {
        return 0.0;
    }
    let middle = count / 2;
    if count % 2 == 0 {
        (holders[middle - 1].balance + holders[middle].balance) / 2.0
    } else {
        holders[middle].balance
    }
}

/// Share of `total_supply` held by `top`, as a percentage rounded to 2 dp.
pub fn top_holders_proportion(top: &[f64], total_supply: f64) -> f64 {
    if total_supply <= 0.0 {
        return 0.0;
    }
    let held: f64 = top.iter().sum();
    round2(held / total_supply * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holders(balances: &[f64]) -> Vec<Holder> {
        balances
            .iter()
            .enumerate()
            .map(|(i, &balance)| Holder {
                address: format!("0x{:040x}", i + 1),
                balance,
            })
            .collect()
    }

    #[test]
    fn median_of_odd_count() {
        let stats = calculate_distribution(&holders(&[50.0, 40.0, 30.0, 20.0, 10.0]), 150.0).unwrap();
        assert_eq!(stats.median_balance, 30.0);
        assert_eq!(stats.average_balance, 30.0);
    }

    #[test]
    fn median_of_even_count() {
        let stats = calculate_distribution(&holders(&[40.0, 30.0, 20.0, 10.0]), 100.0).unwrap();
        assert_eq!(stats.median_balance, 25.0);
    }

    #[test]
    fn empty_holder_set_yields_zeroes() {
        let stats = calculate_distribution(&[], 1_000.0).unwrap();
        assert_eq!(stats.total_holders, 0);
        assert_eq!(stats.average_balance, 0.0);
        assert_eq!(stats.median_balance, 0.0);
        assert!(stats.group_stats.iter().all(|g| g.account_count == 0));
    }

    #[test]
    fn buckets_slice_by_holder_rank() {
        let balances: Vec<f64> = (1..=20).rev().map(|b| b as f64).collect();
        let stats = calculate_distribution(&holders(&balances), 210.0).unwrap();

        let counts: Vec<u32> = stats.group_stats.iter().map(|g| g.account_count).collect();
        assert_eq!(counts, vec![2, 3, 5, 6]);

        let top = &stats.group_stats[0];
        assert_eq!(top.range, "0-10%");
        assert_eq!(top.amount_tokens_held, 39.0);
        assert_eq!(top.percent_tokens_held, 18.57);

        let ranges: Vec<&str> = stats.group_stats.iter().map(|g| g.range.as_str()).collect();
        assert_eq!(ranges, vec!["0-10%", "10-25%", "25-50%", "50-80%"]);
    }

    #[test]
    fn bucket_counts_never_exceed_total() {
        for size in 1..=57 {
            let balances: Vec<f64> = (0..size).map(|i| (size - i) as f64).collect();
            let stats = calculate_distribution(&holders(&balances), 1.0).unwrap();
            let counted: u32 = stats.group_stats.iter().map(|g| g.account_count).sum();
            assert!(counted as usize <= stats.total_holders);
        }
    }

    #[test]
    fn zero_supply_reports_zero_percent() {
        let stats = calculate_distribution(&holders(&[5.0; 10]), 0.0).unwrap();
        assert!(stats.group_stats.iter().all(|g| g.percent_tokens_held == 0.0));
        assert_eq!(stats.average_balance, 0.0);
    }

    #[test]
    fn outputs_are_rounded() {
        let stats = calculate_distribution(&holders(&[10.0, 10.0, 10.0]), 100.0).unwrap();
        assert_eq!(stats.average_balance, 33.33);
    }

    #[test]
    fn non_finite_balance_is_rejected() {
        let err = calculate_distribution(&holders(&[f64::NAN]), 1.0).unwrap_err();
        assert!(matches!(err, DistributionError::NonFiniteBalance { .. }));
    }

    #[test]
    fn top_proportion_handles_zero_supply() {
        assert_eq!(top_holders_proportion(&[10.0, 5.0], 0.0), 0.0);
        assert_eq!(top_holders_proportion(&[10.0, 5.0], 45.0), 33.33);
    }
}
