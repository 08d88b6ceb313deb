//! Listing state engine.
//!
//! A pure transition function: given the persisted listing, the current tip,
//! and an optional confirmed spend observation, it proposes the next status
//! (or nothing). The engine never fetches state itself and holds no locks;
//! the event pipeline feeds it and writes the result back through the store,
//! whose forward-only progression check makes repeated delivery harmless.

use chrono::{DateTime, Utc};

use crate::oracle::SpendingTx;
use crate::types::{Listing, ListingStatus, SpendInfo};

/// A proposed status change. `spend` is populated exactly for the spend
/// terminals (`sold` / `closed`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub to: ListingStatus,
    pub spend: Option<SpendInfo>,
}

/// The status a never-spent listing should hold at height `h`.
///
/// Evaluated against the current tip only, so a listing that slept through
/// its whole window legally jumps straight from `upcoming` to `finished` or
/// `expired` — nothing was purchasable in the missed window because no
/// revelation occurred during it.
pub fn status_at_height(listing: &Listing, h: u64) -> ListingStatus {
    if h < listing.start_block {
        ListingStatus::Upcoming
    } else if h <= listing.end_block {
        ListingStatus::Active
    } else if listing.blocks_after_end > 0 && h <= listing.grace_end() {
        ListingStatus::Finished
    } else {
        ListingStatus::Expired
    }
}

/// Classify a confirmed spend of the listed UTXO.
///
/// An output whose value equals any step price is taken as settlement of a
/// PSBT the broker issued: `sold`, with the first matching output's address
/// as recipient. Anything else is an out-of-band `closed`, with the first
/// output's address recorded best-effort. Heuristic by design — the value
/// match is a strong signal, not a cryptographic proof.
pub fn classify_spend(
    tx: &SpendingTx,
    step_prices: &[u64],
    now: DateTime<Utc>,
) -> Transition {
    let matching = tx
        .outputs
        .iter()
        .find(|out| step_prices.contains(&out.value_sats));
    let (status, recipient) = match matching {
        Some(out) => (ListingStatus::Sold, out.address.clone()),
        None => (
            ListingStatus::Closed,
            tx.outputs.first().and_then(|out| out.address.clone()),
        ),
    };
    Transition {
        to: status,
        spend: Some(SpendInfo {
            txid: tx.txid,
            block_height: tx.block_height,
            recipient,
            spent_at: now,
        }),
    }
}

/// Evaluate one listing against the current tip and an optional spend
/// observation. Returns `None` when no transition is due. Safe to invoke
/// repeatedly with the same inputs: terminal listings yield nothing, and a
/// proposed transition is always strictly forward.
pub fn evaluate(
    listing: &Listing,
    tip: u64,
    spend: Option<&SpendingTx>,
    step_prices: &[u64],
    now: DateTime<Utc>,
) -> Option<Transition> {
    if listing.status.is_terminal() {
        return None;
    }
    if let Some(tx) = spend {
        return Some(classify_spend(tx, step_prices, now));
    }
    let target = status_at_height(listing, tip);
    if listing.status.can_transition_to(target) {
        Some(Transition { to: target, spend: None })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::TxOutSummary;
    use crate::types::AssetAmount;

    const PRICES: [u64; 5] = [100_000, 90_000, 80_000, 70_000, 60_000];

    fn listing(status: ListingStatus) -> Listing {
        Listing {
            id: 3,
            asset_name: "RAREPEPE".to_string(),
            asset_qty: AssetAmount::from_decimal_str("1", false).unwrap(),
            utxo: format!("{}:0", "cd".repeat(32)).parse().unwrap(),
            start_block: 850_000,
            end_block: 850_004,
            blocks_after_end: 144,
            start_price_sats: 100_000,
            end_price_sats: 60_000,
            price_decrement: 10_000,
            status,
            seller: "bc1qseller".to_string(),
            spend: None,
            created_at: Utc::now(),
        }
    }

    fn spending_tx(output_values: &[u64]) -> SpendingTx {
        SpendingTx {
            txid: "ef".repeat(32).parse().unwrap(),
            block_height: 850_002,
            outputs: output_values
                .iter()
                .enumerate()
                .map(|(i, v)| TxOutSummary {
                    value_sats: *v,
                    address: Some(format!("bc1qout{i}")),
                })
                .collect(),
            inputs: vec![],
        }
    }

    #[test]
    fn upcoming_becomes_active_at_start() {
        let l = listing(ListingStatus::Upcoming);
        assert!(evaluate(&l, 849_999, None, &[], Utc::now()).is_none());
        let t = evaluate(&l, 850_000, None, &[], Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Active);
        assert!(t.spend.is_none());
    }

    #[test]
    fn active_finishes_then_expires_with_grace() {
        let l = listing(ListingStatus::Active);
        assert!(evaluate(&l, 850_004, None, &[], Utc::now()).is_none());
        let t = evaluate(&l, 850_005, None, &[], Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Finished);

        let l = listing(ListingStatus::Finished);
        assert!(evaluate(&l, 850_148, None, &[], Utc::now()).is_none());
        let t = evaluate(&l, 850_149, None, &[], Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Expired);
    }

    #[test]
    fn active_expires_directly_without_grace() {
        let mut l = listing(ListingStatus::Active);
        l.blocks_after_end = 0;
        let t = evaluate(&l, 850_005, None, &[], Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Expired);
    }

    #[test]
    fn upcoming_skips_ahead_past_a_missed_window() {
        let l = listing(ListingStatus::Upcoming);
        let t = evaluate(&l, 850_010, None, &[], Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Finished);
        let t = evaluate(&l, 851_000, None, &[], Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Expired);
    }

    #[test]
    fn regressed_tip_proposes_nothing() {
        let l = listing(ListingStatus::Finished);
        assert!(evaluate(&l, 850_002, None, &[], Utc::now()).is_none());
    }

    #[test]
    fn terminal_listings_are_inert() {
        for status in [ListingStatus::Sold, ListingStatus::Closed, ListingStatus::Expired] {
            let l = listing(status);
            assert!(evaluate(&l, 850_002, None, &PRICES, Utc::now()).is_none());
            let tx = spending_tx(&[80_000]);
            assert!(evaluate(&l, 850_002, Some(&tx), &PRICES, Utc::now()).is_none());
        }
    }

    #[test]
    fn matching_output_value_classifies_as_sold() {
        let l = listing(ListingStatus::Active);
        let tx = spending_tx(&[80_000, 2_000]);
        let t = evaluate(&l, 850_002, Some(&tx), &PRICES, Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Sold);
        let spend = t.spend.unwrap();
        assert_eq!(spend.txid, tx.txid);
        assert_eq!(spend.block_height, 850_002);
        assert_eq!(spend.recipient.as_deref(), Some("bc1qout0"));
    }

    #[test]
    fn first_matching_output_wins_the_tie() {
        let l = listing(ListingStatus::Active);
        let tx = spending_tx(&[5_000, 70_000, 70_000]);
        let t = evaluate(&l, 850_002, Some(&tx), &PRICES, Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Sold);
        assert_eq!(t.spend.unwrap().recipient.as_deref(), Some("bc1qout1"));
    }

    #[test]
    fn no_matching_output_classifies_as_closed() {
        let l = listing(ListingStatus::Active);
        let tx = spending_tx(&[123_456, 2_000]);
        let t = evaluate(&l, 850_002, Some(&tx), &PRICES, Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Closed);
        assert_eq!(t.spend.unwrap().recipient.as_deref(), Some("bc1qout0"));
    }

    #[test]
    fn closed_with_no_outputs_has_no_recipient() {
        let l = listing(ListingStatus::Upcoming);
        let tx = spending_tx(&[]);
        let t = evaluate(&l, 849_990, Some(&tx), &PRICES, Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Closed);
        assert!(t.spend.unwrap().recipient.is_none());
    }

    #[test]
    fn spend_takes_priority_over_block_transition() {
        let l = listing(ListingStatus::Upcoming);
        let tx = spending_tx(&[100_000]);
        let t = evaluate(&l, 851_000, Some(&tx), &PRICES, Utc::now()).unwrap();
        assert_eq!(t.to, ListingStatus::Sold);
    }

    #[test]
    fn evaluation_is_idempotent() {
        // Applying the proposed transition and evaluating again with the
        // same inputs yields no further change.
        let now = Utc::now();
        let mut l = listing(ListingStatus::Active);
        let tx = spending_tx(&[60_000]);
        let t = evaluate(&l, 850_149, Some(&tx), &PRICES, now).unwrap();
        l.status = t.to;
        l.spend = t.spend;
        assert!(evaluate(&l, 850_149, Some(&tx), &PRICES, now).is_none());

        let mut l = listing(ListingStatus::Active);
        let t = evaluate(&l, 850_149, None, &[], now).unwrap();
        l.status = t.to;
        assert!(evaluate(&l, 850_149, None, &[], now).is_none());
    }
}
