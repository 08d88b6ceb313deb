//! Core domain types for the veiling auction broker.
//!
//! All prices are denominated in satoshis. Asset quantities are fixed-point
//! integers with 8 fractional digits for divisible assets ([`AssetAmount`]).
//! UTXOs are identified by [`bitcoin::OutPoint`].

use std::fmt;
use std::str::FromStr;

use bitcoin::{OutPoint, Txid};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::AmountError;

/// Fixed-point scale for divisible asset quantities.
pub const DIVISIBLE_SCALE: u32 = 8;

/// Listing lifecycle status.
///
/// `Sold`, `Closed`, and `Expired` are terminal: a listing in one of those
/// states never transitions again, and no longer blocks new listings on the
/// same UTXO.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Upcoming,
    Active,
    Finished,
    Expired,
    Sold,
    Closed,
}

impl ListingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sold | Self::Closed | Self::Expired)
    }

    /// Position in the no-spend lifecycle chain
    /// `upcoming -> active -> finished -> expired`.
    fn chain_rank(self) -> Option<u8> {
        match self {
            Self::Upcoming => Some(0),
            Self::Active => Some(1),
            Self::Finished => Some(2),
            Self::Expired => Some(3),
            Self::Sold | Self::Closed => None,
        }
    }

    /// Whether a transition from `self` to `next` moves the lifecycle
    /// forward. Terminal states accept nothing; a spend terminal (`sold` /
    /// `closed`) is reachable from any non-terminal state; the remaining
    /// states only advance along the lifecycle chain, never backwards.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next || self.is_terminal() {
            return false;
        }
        match (self.chain_rank(), next.chain_rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Finished => "finished",
            Self::Expired => "expired",
            Self::Sold => "sold",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(Self::Upcoming),
            "active" => Ok(Self::Active),
            "finished" => Ok(Self::Finished),
            "expired" => Ok(Self::Expired),
            "sold" => Ok(Self::Sold),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Fixed-point asset quantity.
///
/// Divisible assets carry 8 fractional digits (one unit = 10^-8 of the
/// asset); indivisible assets are whole counts. Serialized to decimal
/// strings at the API boundary via [`fmt::Display`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssetAmount {
    units: u64,
    divisible: bool,
}

impl AssetAmount {
    /// Parse a decimal quantity string under the given divisibility.
    pub fn from_decimal_str(s: &str, divisible: bool) -> Result<Self, AmountError> {
        let dec = Decimal::from_str(s.trim())
            .map_err(|_| AmountError::Unparseable(s.to_string()))?
            .normalize();
        if dec.is_sign_negative() {
            return Err(AmountError::Negative);
        }
        let units = if divisible {
            if dec.scale() > DIVISIBLE_SCALE {
                return Err(AmountError::TooPrecise { max: DIVISIBLE_SCALE });
            }
            dec.checked_mul(Decimal::from(10u64.pow(DIVISIBLE_SCALE)))
                .and_then(|d| d.to_u64())
                .ok_or(AmountError::Overflow)?
        } else {
            if dec.scale() > 0 {
                return Err(AmountError::FractionalIndivisible);
            }
            dec.to_u64().ok_or(AmountError::Overflow)?
        };
        Ok(Self { units, divisible })
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn is_divisible(&self) -> bool {
        self.divisible
    }

    pub fn is_zero(&self) -> bool {
        self.units == 0
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.divisible {
            write!(f, "{}", Decimal::from_i128_with_scale(self.units as i128, DIVISIBLE_SCALE))
        } else {
            write!(f, "{}", self.units)
        }
    }
}

/// Terminal-spend details, present exactly when status is `sold` or `closed`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SpendInfo {
    /// Transaction that consumed the listed UTXO.
    pub txid: Txid,
    /// Block that confirmed the spending transaction.
    pub block_height: u64,
    /// Buyer address (`sold`: the matching output; `closed`: best-effort
    /// first output). `None` when the output script has no address form.
    pub recipient: Option<String>,
    /// Wall-clock time the spend was observed.
    pub spent_at: DateTime<Utc>,
}

/// A Dutch-auction listing: the aggregate root.
///
/// The PSBT schedule lives in separate [`PsbtStep`] records keyed by
/// `(listing id, block)`; the listing itself never carries PSBT data, so
/// metadata queries cannot leak unrevealed steps.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Listing {
    pub id: u64,
    pub asset_name: String,
    pub asset_qty: AssetAmount,
    pub utxo: OutPoint,
    pub start_block: u64,
    pub end_block: u64,
    /// Grace window after `end_block` during which the final step remains
    /// purchasable. Zero disables the `finished` phase entirely.
    pub blocks_after_end: u64,
    pub start_price_sats: u64,
    pub end_price_sats: u64,
    pub price_decrement: u64,
    pub status: ListingStatus,
    /// Address controlling the listed UTXO, derived at admission.
    pub seller: String,
    pub spend: Option<SpendInfo>,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Number of blocks (and therefore steps) the schedule covers.
    pub fn span(&self) -> u64 {
        self.end_block - self.start_block + 1
    }

    /// Last block at which the final step is still purchasable.
    pub fn grace_end(&self) -> u64 {
        self.end_block.saturating_add(self.blocks_after_end)
    }

    pub fn is_fixed_price(&self) -> bool {
        self.start_block == self.end_block
    }
}

/// Admission-validated listing data, before the store assigns an id.
#[derive(Clone, Debug)]
pub struct NewListing {
    pub asset_name: String,
    pub asset_qty: AssetAmount,
    pub utxo: OutPoint,
    pub start_block: u64,
    pub end_block: u64,
    pub blocks_after_end: u64,
    pub start_price_sats: u64,
    pub end_price_sats: u64,
    pub price_decrement: u64,
    pub seller: String,
    pub created_at: DateTime<Utc>,
}

impl NewListing {
    /// Materialize as a stored listing under the assigned id. New listings
    /// always enter in `upcoming` with no spend.
    pub fn into_listing(self, id: u64) -> Listing {
        Listing {
            id,
            asset_name: self.asset_name,
            asset_qty: self.asset_qty,
            utxo: self.utxo,
            start_block: self.start_block,
            end_block: self.end_block,
            blocks_after_end: self.blocks_after_end,
            start_price_sats: self.start_price_sats,
            end_price_sats: self.end_price_sats,
            price_decrement: self.price_decrement,
            status: ListingStatus::Upcoming,
            seller: self.seller,
            spend: None,
            created_at: self.created_at,
        }
    }
}

/// One block of the PSBT schedule. Unique on `(listing_id, block_number)`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PsbtStep {
    pub listing_id: u64,
    /// Height at which this step becomes the current step.
    pub block_number: u64,
    /// Advertised price in satoshis.
    pub price_sats: u64,
    /// Opaque base64 PSBT blob; only the magic bytes are ever inspected.
    pub psbt_data: String,
}

/// A schedule step as submitted, before a listing id exists.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct NewStep {
    pub block_number: u64,
    pub price_sats: u64,
    pub psbt_data: String,
}
