use std::collections::HashMap;

use crate::types::models::Holder;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Lowercases an address so the same account never shows up twice.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Running per-address balances in decimal-adjusted token units.
///
/// Entries keep their first-seen order so equal balances come out of
/// [`BalanceLedger::snapshot`] in a stable order.
#[derive(Debug, Default, Clone)]
pub struct BalanceLedger {
    entries: Vec<(String, f64)>,
    index: HashMap<String, usize>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hydrate(&mut self, holders: &[Holder]) {
        for holder in holders {
            let slot = self.slot(&holder.address);
            self.entries[slot].1 = holder.balance;
        }
    }

    /// Moves `value` from `from` to `to`. Negative intermediate balances are
    /// allowed since replay may start from a partial checkpoint.
    pub fn apply_transfer(&mut self, from: &str, to: &str, value: f64) {
        let from_slot = self.slot(from);
        let to_slot = self.slot(to);
        self.entries[from_slot].1 -= value;
        self.entries[to_slot].1 += value;
    }

    /// Holders strictly above `dust_threshold`, largest first.
    pub fn snapshot(&self, dust_threshold: f64) -> Vec<Holder> {
        let mut holders: Vec<Holder> = self
            .entries
            .iter()
            .filter(|(address, balance)| *balance > dust_threshold && address != ZERO_ADDRESS)
            .map(|(address, balance)| Holder {
                address: address.clone(),
                balance: *balance,
            })
            .collect();

        holders.sort_by(|a, b| b.balance.total_cmp(&a.balance));
        holders
    }

    #[cfg(test)]
    pub fn balance_of(&self, address: &str) -> Option<f64> {
        self.index
            .get(&normalize_address(address))
            .map(|&slot| self.entries[slot].1)
    }

    #[cfg(test)]
    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, balance)| balance).sum()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn slot(&mut self, address: &str) -> usize {
        let key = normalize_address(address);
        if let Some(&slot) = self.index.get(&key) {
            return slot;
        }
        self.entries.push((key.clone(), 0.0));
        self.index.insert(key, self.entries.len() - 1);
        self.entries.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfers_conserve_total_balance() {
        let mut ledger = BalanceLedger::new();
        ledger.hydrate(&[
            Holder { address: "0xaa".into(), balance: 500.0 },
            Holder { address: "0xbb".into(), balance: 250.0 },
        ]);
        let before = ledger.total();

        ledger.apply_transfer("0xaa", "0xbb", 120.5);
        ledger.apply_transfer("0xbb", "0xcc", 300.0);
        ledger.apply_transfer("0xcc", "0xdd", 10.25);
        ledger.apply_transfer("0xdd", "0xaa", 1.0);

        assert!((ledger.total() - before).abs() < 1e-9);
    }

    #[test]
    fn addresses_are_case_normalized() {
        let mut ledger = BalanceLedger::new();
        ledger.apply_transfer("0xAbC", "0xDeF", 5.0);
        ledger.apply_transfer("0xdef", "0xabc", 2.0);

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.balance_of("0xABC"), Some(-3.0));
        assert_eq!(ledger.balance_of("0xdef"), Some(3.0));
    }

    #[test]
    fn first_seen_addresses_are_tracked_at_zero() {
        let mut ledger = BalanceLedger::new();
        ledger.apply_transfer("0x01", "0x02", 0.0);

        assert_eq!(ledger.balance_of("0x01"), Some(0.0));
        assert_eq!(ledger.balance_of("0x02"), Some(0.0));
    }

    #[test]
    fn dust_threshold_is_strict() {
        let mut ledger = BalanceLedger::new();
        ledger.hydrate(&[
            Holder { address: "0xdust".into(), balance: 0.01 },
            Holder { address: "0xkeep".into(), balance: 0.011 },
        ]);

        let holders = ledger.snapshot(0.01);
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].address, "0xkeep");
    }

    #[test]
    fn snapshot_is_sorted_and_repeatable() {
        let mut ledger = BalanceLedger::new();
        ledger.apply_transfer(ZERO_ADDRESS, "0x01", 10.0);
        ledger.apply_transfer(ZERO_ADDRESS, "0x02", 30.0);
        ledger.apply_transfer(ZERO_ADDRESS, "0x03", 30.0);
        ledger.apply_transfer("0x02", ZERO_ADDRESS, 5.0);

        let first = ledger.snapshot(0.01);
        let second = ledger.snapshot(0.01);
        assert_eq!(first, second);

        let order: Vec<&str> = first.iter().map(|h| h.address.as_str()).collect();
        assert_eq!(order, vec!["0x03", "0x02", "0x01"]);
    }

    #[test]
    fn equal_balances_keep_insertion_order() {
        let mut ledger = BalanceLedger::new();
        ledger.hydrate(&[
            Holder { address: "0xb".into(), balance: 7.0 },
            Holder { address: "0xa".into(), balance: 7.0 },
        ]);

        let order: Vec<String> = ledger.snapshot(0.01).into_iter().map(|h| h.address).collect();
        assert_eq!(order, vec!["0xb".to_string(), "0xa".to_string()]);
    }
}
