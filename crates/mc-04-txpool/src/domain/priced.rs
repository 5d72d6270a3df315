//! Price ordering of remote transactions.

use shared_types::{Hash, U256};
use std::cmp::Ordering;

/// Reference to a remote transaction, ordered for eviction.
///
/// Iteration runs from the most to the least valuable entry, so the eviction
/// candidate is `BTreeSet::last()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedTransaction {
    pub gas_price: U256,
    pub hash: Hash,
    /// Arrival order; earlier arrivals rank higher at equal price.
    pub seq: u64,
}

impl PricedTransaction {
    pub fn new(gas_price: U256, hash: Hash, seq: u64) -> Self {
        Self {
            gas_price,
            hash,
            seq,
        }
    }
}

impl Ord for PricedTransaction {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .gas_price
            .cmp(&self.gas_price)
            .then_with(|| self.seq.cmp(&other.seq))
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for PricedTransaction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_cheapest_latest_is_last() {
        let mut set = BTreeSet::new();
        set.insert(PricedTransaction::new(U256::from(5), [1; 32], 0));
        set.insert(PricedTransaction::new(U256::from(2), [2; 32], 1));
        set.insert(PricedTransaction::new(U256::from(2), [3; 32], 2));
        set.insert(PricedTransaction::new(U256::from(9), [4; 32], 3));

        assert_eq!(set.first().unwrap().hash, [4; 32]);
        assert_eq!(set.last().unwrap().hash, [3; 32]);
    }

    proptest! {
        #[test]
        fn prop_last_has_minimum_price(prices in proptest::collection::vec(1u64..1000, 1..50)) {
            let set: BTreeSet<_> = prices
                .iter()
                .enumerate()
                .map(|(i, p)| PricedTransaction::new(U256::from(*p), [i as u8; 32], i as u64))
                .collect();
            let min = prices.iter().min().copied().unwrap();
            prop_assert_eq!(set.last().unwrap().gas_price, U256::from(min));
        }
    }
}
