//! Progressive PSBT revelation.
//!
//! The broker stores the full schedule but exposes only the step whose block
//! the chain tip has reached. A step with `block_number > tip` is never
//! revealed — this is the anti-front-running guarantee: a buyer cannot learn
//! tomorrow's (cheaper) pre-signed transaction today.

use serde::Serialize;

use crate::types::{Listing, ListingStatus, PsbtStep};

/// Why no step is exposed.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HiddenKind {
    NotStarted,
    Sold,
    Closed,
    Expired,
}

/// Which step, if any, the current tip entitles a caller to see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevealDecision {
    /// Expose the step scheduled at this height.
    Step(u64),
    Hidden(HiddenKind),
}

/// Revelation outcome assembled for the query surface: the step (when one
/// is exposed) plus a status hint, or the explanatory kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevealOutcome {
    pub status: ListingStatus,
    pub step: Option<PsbtStep>,
    pub kind: Option<HiddenKind>,
}

/// Decide which step height `tip` entitles a caller to, evaluated top-down:
/// spend terminals hide everything; before the start nothing is visible;
/// inside the range the step at the tip's height is current; inside the
/// grace window the final (lowest-price) step remains purchasable; after
/// that the listing is expired.
pub fn decide(listing: &Listing, tip: u64) -> RevealDecision {
    match listing.status {
        ListingStatus::Sold => return RevealDecision::Hidden(HiddenKind::Sold),
        ListingStatus::Closed => return RevealDecision::Hidden(HiddenKind::Closed),
        _ => {}
    }
    if tip < listing.start_block {
        RevealDecision::Hidden(HiddenKind::NotStarted)
    } else if tip <= listing.end_block {
        RevealDecision::Step(tip)
    } else if listing.blocks_after_end > 0 && tip <= listing.grace_end() {
        RevealDecision::Step(listing.end_block)
    } else {
        RevealDecision::Hidden(HiddenKind::Expired)
    }
}
