//! Listing admission.
//!
//! An ordered, fail-fast validation pipeline: structural shape, PSBT
//! payloads, schedule arithmetic, temporal placement, live UTXO state, and
//! the asset binding — then a single atomic insert that enforces the
//! single-active-listing-per-UTXO invariant. A rejection at any stage
//! leaves no trace in the store.

use bitcoin::{OutPoint, Txid};
use chrono::Utc;
use serde::Deserialize;

use veiling_core::error::{AdmissionError, OracleError, StoreError};
use veiling_core::oracle::{AssetOracle, ChainOracle};
use veiling_core::schedule::{self, ScheduleParams};
use veiling_core::store::ListingStore;
use veiling_core::types::{AssetAmount, Listing, NewListing, NewStep};

/// A listing as submitted over the API, prior to any validation.
#[derive(Deserialize, Clone, Debug)]
pub struct ListingSubmission {
    pub asset_name: String,
    /// Decimal quantity string; divisibility is resolved against the
    /// indexer during admission.
    pub asset_qty: String,
    pub utxo_txid: String,
    pub utxo_vout: u32,
    pub start_block: u64,
    pub end_block: u64,
    pub blocks_after_end: u64,
    pub start_price_sats: u64,
    pub end_price_sats: u64,
    pub price_decrement: u64,
    pub steps: Vec<NewStep>,
}

/// Run the full admission pipeline and persist the listing on success.
pub async fn admit(
    chain: &dyn ChainOracle,
    assets: &dyn AssetOracle,
    store: &dyn ListingStore,
    sub: ListingSubmission,
) -> Result<Listing, AdmissionError> {
    // 1. Shape.
    if sub.asset_name.trim().is_empty() {
        return Err(AdmissionError::Shape("asset_name is required".to_string()));
    }
    let declared_qty = AssetAmount::from_decimal_str(&sub.asset_qty, true)
        .map_err(|e| AdmissionError::Shape(format!("asset_qty: {e}")))?;
    if declared_qty.is_zero() {
        return Err(AdmissionError::Shape("asset_qty must be positive".to_string()));
    }
    if sub.end_block < sub.start_block {
        return Err(AdmissionError::Shape("end_block precedes start_block".to_string()));
    }
    let txid: Txid = sub
        .utxo_txid
        .parse()
        .map_err(|_| AdmissionError::Shape(format!("invalid utxo txid: {}", sub.utxo_txid)))?;
    let outpoint = OutPoint { txid, vout: sub.utxo_vout };

    // 2 + 3. PSBT payloads and schedule arithmetic.
    let params = ScheduleParams {
        start_block: sub.start_block,
        end_block: sub.end_block,
        start_price_sats: sub.start_price_sats,
        end_price_sats: sub.end_price_sats,
        price_decrement: sub.price_decrement,
    };
    schedule::validate(&params, &sub.steps)?;

    // 4. Temporal: admission strictly precedes the schedule.
    let tip = chain.tip().await?;
    if sub.start_block <= tip {
        return Err(AdmissionError::NotInFuture { start: sub.start_block, tip });
    }

    // 5. UTXO liveness.
    let info = chain
        .utxo(outpoint)
        .await?
        .ok_or_else(|| AdmissionError::UtxoUnavailable("missing or already spent".to_string()))?;
    if info.confirmations < 1 {
        return Err(AdmissionError::UtxoUnavailable("unconfirmed".to_string()));
    }
    let seller = info.address.ok_or_else(|| {
        AdmissionError::UtxoUnavailable("controlling script has no address form".to_string())
    })?;

    // 6. Asset binding.
    let balances = assets.balances(outpoint).await?;
    let balance = match balances.len() {
        0 => return Err(AdmissionError::AssetMismatch("utxo carries no asset balance".to_string())),
        1 => &balances[0],
        n => {
            return Err(AdmissionError::AssetMismatch(format!("utxo carries {n} assets")));
        }
    };
    if balance.asset != sub.asset_name {
        return Err(AdmissionError::AssetMismatch(format!(
            "utxo carries {}, not {}",
            balance.asset, sub.asset_name
        )));
    }
    let asset_qty = AssetAmount::from_decimal_str(&sub.asset_qty, balance.divisible)
        .map_err(|e| AdmissionError::AssetMismatch(format!("asset_qty: {e}")))?;
    let bound_qty = AssetAmount::from_decimal_str(&balance.quantity_normalized, balance.divisible)
        .map_err(|e| {
            AdmissionError::Oracle(OracleError::Fatal(format!(
                "indexer quantity {}: {e}",
                balance.quantity_normalized
            )))
        })?;
    if asset_qty != bound_qty {
        return Err(AdmissionError::AssetMismatch(format!(
            "declared {asset_qty}, utxo holds {bound_qty}"
        )));
    }

    // 7. Single-active guard, enforced inside the store's write transaction.
    let listing = NewListing {
        asset_name: sub.asset_name,
        asset_qty,
        utxo: outpoint,
        start_block: sub.start_block,
        end_block: sub.end_block,
        blocks_after_end: sub.blocks_after_end,
        start_price_sats: sub.start_price_sats,
        end_price_sats: sub.end_price_sats,
        price_decrement: sub.price_decrement,
        seller,
        created_at: Utc::now(),
    };
    let id = store
        .insert_listing_atomic(listing, sub.steps)
        .map_err(|e| match e {
            StoreError::UtxoConflict(holder) => AdmissionError::UtxoInUse(holder),
            other => AdmissionError::Store(other),
        })?;

    store
        .get(id)?
        .ok_or_else(|| AdmissionError::Store(StoreError::NotFound(id)))
}
