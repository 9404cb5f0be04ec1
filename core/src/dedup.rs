//! Duplicate detection against prior records.
//!
//! A candidate is a duplicate if any previously stored deposit shares its
//! `tx_ref` or its `id`. The pipeline backs this up with the store's
//! atomic tx-ref claim, which is what actually holds under concurrency;
//! this check catches the common replay case before that.

use crate::types::Deposit;

/// Whether `candidate` collides with any of `prior` on tx ref or id.
///
/// `prior` must not contain the candidate itself.
pub fn is_duplicate<'a>(candidate: &Deposit, prior: impl IntoIterator<Item = &'a Deposit>) -> bool {
    prior
        .into_iter()
        .any(|p| p.tx_ref == candidate.tx_ref || p.id == candidate.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dep(id: &str, tx_ref: &str) -> Deposit {
        let now = Utc::now();
        Deposit {
            id: id.into(),
            tx_ref: tx_ref.into(),
            wallet: "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".into(),
            amount: 1.0,
            currency: "ETH".into(),
            observed_at: now,
            processed: false,
            created_at: now,
        }
    }

    #[test]
    fn same_tx_ref_is_duplicate() {
        let prior = [dep("a", "0x1")];
        assert!(is_duplicate(&dep("b", "0x1"), &prior));
    }

    #[test]
    fn same_id_is_duplicate() {
        let prior = [dep("a", "0x1")];
        assert!(is_duplicate(&dep("a", "0x2"), &prior));
    }

    #[test]
    fn distinct_deposit_is_not_duplicate() {
        let prior = [dep("a", "0x1"), dep("b", "0x2")];
        assert!(!is_duplicate(&dep("c", "0x3"), &prior));
        assert!(!is_duplicate(&dep("c", "0x3"), &[]));
    }
}
