//! Durable listing store contract.
//!
//! Implemented by the node crate's RocksDB store. The store is the single
//! source of truth and the single writer: every status write funnels through
//! [`ListingStore::update_status`], whose forward-only progression check is
//! what makes duplicate push/poll delivery harmless — there is no separate
//! "already handled" bookkeeping.

use bitcoin::OutPoint;

use crate::error::StoreError;
use crate::types::{Listing, ListingStatus, NewListing, NewStep, PsbtStep, SpendInfo};

/// Read-side filter for listing projections. All present fields must match.
#[derive(Clone, Debug, Default)]
pub struct ListingFilter {
    /// OR-set of statuses.
    pub statuses: Option<Vec<ListingStatus>>,
    pub seller: Option<String>,
    /// Matches the spend recipient (the buyer on a `sold` listing).
    pub recipient: Option<String>,
}

impl ListingFilter {
    pub fn matches(&self, listing: &Listing) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&listing.status) {
                return false;
            }
        }
        if let Some(seller) = &self.seller {
            if listing.seller != *seller {
                return false;
            }
        }
        if let Some(recipient) = &self.recipient {
            match &listing.spend {
                Some(spend) if spend.recipient.as_deref() == Some(recipient.as_str()) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Durable, transactional listing store.
pub trait ListingStore: Send + Sync {
    /// Insert a listing and its full schedule in one write transaction,
    /// enforcing the single-active-listing-per-UTXO invariant against
    /// currently persisted state. Fails with [`StoreError::UtxoConflict`]
    /// when a non-terminal listing already holds the UTXO. Returns the
    /// assigned id.
    fn insert_listing_atomic(&self, listing: NewListing, steps: Vec<NewStep>)
        -> Result<u64, StoreError>;

    fn get(&self, id: u64) -> Result<Option<Listing>, StoreError>;

    /// The schedule step of `id` at exactly `block`, if any.
    fn step_for(&self, id: u64, block: u64) -> Result<Option<PsbtStep>, StoreError>;

    /// The full schedule of `id`, ascending by block.
    fn steps_for(&self, id: u64) -> Result<Vec<PsbtStep>, StoreError>;

    /// All step prices of `id`, ascending by block. Used by spend
    /// classification.
    fn step_prices(&self, id: u64) -> Result<Vec<u64>, StoreError> {
        Ok(self.steps_for(id)?.into_iter().map(|s| s.price_sats).collect())
    }

    fn list(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError>;

    /// Apply a status transition. Idempotent: writing the current status
    /// again is a no-op (`Ok(false)`); leaving a terminal state or moving
    /// backwards is rejected. The spend terminals require `spend`.
    /// Returns whether a write occurred.
    fn update_status(
        &self,
        id: u64,
        new_status: ListingStatus,
        spend: Option<SpendInfo>,
    ) -> Result<bool, StoreError>;

    /// Listings still subject to transitions (`upcoming`/`active`/`finished`),
    /// ascending by id. Drives the scheduled sweeps.
    fn non_terminal_listings(&self) -> Result<Vec<Listing>, StoreError>;

    /// Non-terminal listings pinned to the outpoint. At most one exists
    /// (the single-active invariant); a vec keeps the read contract shaped
    /// like the sweep iterators.
    fn listings_watching_utxo(&self, outpoint: OutPoint) -> Result<Vec<Listing>, StoreError>;
}
