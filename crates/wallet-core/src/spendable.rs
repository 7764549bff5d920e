use std::cmp::Reverse;

use crate::model::{Output, OutputStatus};

#[derive(Clone, Copy, Debug, Default)]
pub struct SpendFilter {
    pub min_confirmations: u64,
    pub coinbase_maturity: u64,
    pub tip_height: u64,
}

impl SpendFilter {
    pub fn is_spendable(&self, o: &Output) -> bool {
        if o.status != OutputStatus::Confirmed {
            return false;
        }
        let confs = o.confirmations(self.tip_height);
        let needed = if o.is_coinbase {
            self.min_confirmations.max(self.coinbase_maturity)
        } else {
            self.min_confirmations
        };
        confs >= needed
    }
}

pub struct SpendableSet;

impl SpendableSet {
    /// Spendable outputs, largest first; ties go to the oldest, then to
    /// commitment order so selection is deterministic.
    pub fn filter(outputs: &[Output], f: SpendFilter) -> Vec<&Output> {
        let mut filtered: Vec<&Output> = outputs.iter().filter(|o| f.is_spendable(o)).collect();
        filtered.sort_by_key(|o| (Reverse(o.amount), o.height, o.commitment));
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Commitment;

    fn out(amount: u64, height: u64, status: OutputStatus, coinbase: bool, tag: u8) -> Output {
        Output {
            commitment: Commitment([tag; 32]),
            amount,
            key_index: tag as u32,
            height,
            is_coinbase: coinbase,
            status,
            tx_id: None,
        }
    }

    #[test]
    fn filters_by_status_and_confirmations() {
        let outputs = vec![
            out(10, 100, OutputStatus::Confirmed, false, 1),
            out(20, 109, OutputStatus::Confirmed, false, 2),
            out(30, 100, OutputStatus::Locked, false, 3),
            out(40, 100, OutputStatus::Unconfirmed, false, 4),
            out(50, 100, OutputStatus::Spent, false, 5),
        ];
        let f = SpendFilter {
            min_confirmations: 5,
            coinbase_maturity: 0,
            tip_height: 110,
        };
        let picked: Vec<u64> = SpendableSet::filter(&outputs, f)
            .iter()
            .map(|o| o.amount)
            .collect();
        assert_eq!(picked, vec![10]);
    }

    #[test]
    fn coinbase_waits_for_maturity() {
        let outputs = vec![out(60, 100, OutputStatus::Confirmed, true, 1)];
        let mut f = SpendFilter {
            min_confirmations: 1,
            coinbase_maturity: 1440,
            tip_height: 200,
        };
        assert!(SpendableSet::filter(&outputs, f).is_empty());
        f.tip_height = 1539;
        assert_eq!(SpendableSet::filter(&outputs, f).len(), 1);
    }

    #[test]
    fn orders_largest_first_then_oldest() {
        let outputs = vec![
            out(20, 5, OutputStatus::Confirmed, false, 1),
            out(50, 9, OutputStatus::Confirmed, false, 2),
            out(20, 3, OutputStatus::Confirmed, false, 3),
            out(30, 1, OutputStatus::Confirmed, false, 4),
        ];
        let f = SpendFilter {
            min_confirmations: 1,
            coinbase_maturity: 0,
            tip_height: 10,
        };
        let order: Vec<(u64, u64)> = SpendableSet::filter(&outputs, f)
            .iter()
            .map(|o| (o.amount, o.height))
            .collect();
        assert_eq!(order, vec![(50, 9), (30, 1), (20, 3), (20, 5)]);
    }
}
